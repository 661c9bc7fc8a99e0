//! Gene arithmetic (component B): a gene is a fixed-capacity digit string
//! interpreted as a tiny program `y = f(x)`.
//!
//! The first digit selects one of six top-level operations (constant,
//! identity, affine, piecewise-linear threshold, modular step, chained
//! composition — the exact set the specification's design notes leave as
//! implementation freedom within "a small fixed set (≤10)"). Digit values
//! `6..=9` decode to an undefined operation slot, which is a `DomainError`
//! per the specification rather than a panic.

use crate::error::GeneError;

/// Compile-time gene capacity. Must be `>= 32` per the specification.
pub const GENE_CAPACITY: usize = 48;

/// A fixed-capacity sequence of decimal digits (each `0..=9`), the unit of
/// evolution. Two genes are equal iff their `(len, digits)` match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Gene {
    digits: [u8; GENE_CAPACITY],
    len: u8,
}

impl Gene {
    /// Builds a gene from a digit slice, zero-padding the unused capacity.
    /// `digits.len()` must be `<= GENE_CAPACITY` and every element `<= 9`;
    /// callers that can't guarantee this should validate first (the pool
    /// only ever constructs genes through its own generators, which do).
    #[must_use]
    pub fn from_digits(digits: &[u8]) -> Self {
        debug_assert!(digits.len() <= GENE_CAPACITY);
        debug_assert!(digits.iter().all(|&d| d <= 9));
        let mut buf = [0u8; GENE_CAPACITY];
        let len = digits.len().min(GENE_CAPACITY);
        buf[..len].copy_from_slice(&digits[..len]);
        Self {
            digits: buf,
            len: len as u8,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn digits(&self) -> &[u8] {
        &self.digits[..self.len()]
    }

    fn digit_at(&self, i: usize) -> u8 {
        if i < self.len() {
            self.digits[i]
        } else {
            0
        }
    }

    /// Reads a signed value encoded as three magnitude digits followed by a
    /// sign flag (`1` = negative, anything else = non-negative), starting
    /// at `start`. Returns the value and the index just past the field.
    fn read_signed(&self, start: usize) -> (i32, usize) {
        let magnitude = i32::from(self.digit_at(start)) * 100
            + i32::from(self.digit_at(start + 1)) * 10
            + i32::from(self.digit_at(start + 2));
        let value = if self.digit_at(start + 3) == 1 {
            -magnitude
        } else {
            magnitude
        };
        (value, start + 4)
    }

    /// Reads an unsigned three-digit value (`000..=999`) starting at `start`.
    fn read_unsigned(&self, start: usize) -> (i32, usize) {
        let value = i32::from(self.digit_at(start)) * 100
            + i32::from(self.digit_at(start + 1)) * 10
            + i32::from(self.digit_at(start + 2));
        (value, start + 3)
    }

    /// Interprets the gene and evaluates it at `x`. Deterministic and total:
    /// every `(gene, x)` pair yields either a value or a `GeneError`.
    pub fn apply(&self, x: i32) -> Result<i32, GeneError> {
        match self.digit_at(0) {
            0 => {
                // Const: y = c
                let (c, _) = self.read_signed(1);
                Ok(c)
            }
            1 => {
                // Identity: y = x
                Ok(x)
            }
            2 => {
                // Affine: y = a*x + b
                let a = i32::from(self.digit_at(1));
                let a = if self.digit_at(2) == 1 { -a } else { a };
                let (b, _) = self.read_signed(3);
                Ok(a.saturating_mul(x).saturating_add(b))
            }
            3 => {
                // Piecewise-linear threshold: y = if x < t { lo } else { hi }
                let (t, next) = self.read_signed(1);
                let (lo, next) = self.read_signed(next);
                let (hi, _) = self.read_signed(next);
                Ok(if x < t { lo } else { hi })
            }
            4 => {
                // Modular step: y = (x mod m) + offset, m in [0, 999]
                let (m, next) = self.read_unsigned(1);
                let (offset, _) = self.read_signed(next);
                if m == 0 {
                    return Err(GeneError::DivisionByZero);
                }
                Ok(x.rem_euclid(m).saturating_add(offset))
            }
            5 => {
                // Chained composition: y = a2*(a1*x + b1) + b2
                let a1 = i32::from(self.digit_at(1));
                let a1 = if self.digit_at(2) == 1 { -a1 } else { a1 };
                let (b1, next) = self.read_signed(3);
                let a2 = i32::from(self.digit_at(next));
                let a2 = if self.digit_at(next + 1) == 1 { -a2 } else { a2 };
                let (b2, _) = self.read_signed(next + 2);
                let inner = a1.saturating_mul(x).saturating_add(b1);
                Ok(a2.saturating_mul(inner).saturating_add(b2))
            }
            slot => Err(GeneError::UndefinedSlot(slot)),
        }
    }

    /// Returns a pure, deterministic, human-readable description of the
    /// gene, `<= 128` bytes.
    #[must_use]
    pub fn describe(&self) -> String {
        let s = match self.digit_at(0) {
            0 => {
                let (c, _) = self.read_signed(1);
                format!("y = {c}")
            }
            1 => "y = x".to_string(),
            2 => {
                let a = i32::from(self.digit_at(1));
                let a = if self.digit_at(2) == 1 { -a } else { a };
                let (b, _) = self.read_signed(3);
                describe_affine(a, b)
            }
            3 => {
                let (t, next) = self.read_signed(1);
                let (lo, next) = self.read_signed(next);
                let (hi, _) = self.read_signed(next);
                format!("y = if x < {t} {{ {lo} }} else {{ {hi} }}")
            }
            4 => {
                let (m, next) = self.read_unsigned(1);
                let (offset, _) = self.read_signed(next);
                format!("y = (x mod {m}) + {offset}")
            }
            5 => {
                let a1 = i32::from(self.digit_at(1));
                let a1 = if self.digit_at(2) == 1 { -a1 } else { a1 };
                let (b1, next) = self.read_signed(3);
                let a2 = i32::from(self.digit_at(next));
                let a2 = if self.digit_at(next + 1) == 1 { -a2 } else { a2 };
                let (b2, _) = self.read_signed(next + 2);
                format!(
                    "y = {} of ({})",
                    describe_affine_bare(a2, b2),
                    describe_affine_bare(a1, b1)
                )
            }
            slot => format!("y = <undefined op {slot}>"),
        };
        if s.len() > 128 {
            s[..128].to_string()
        } else {
            s
        }
    }
}

fn describe_affine(a: i32, b: i32) -> String {
    format!("y = {}", describe_affine_bare(a, b))
}

/// Same as [`describe_affine`] without the leading `"y = "`, for nesting
/// inside a larger description (e.g. chained composition).
fn describe_affine_bare(a: i32, b: i32) -> String {
    match b.cmp(&0) {
        std::cmp::Ordering::Less => format!("{a}·x - {}", -b),
        _ => format!("{a}·x + {b}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn affine(a: u8, a_sign: u8, b: i32) -> Gene {
        let (mag, sign) = if b < 0 { (-b, 1) } else { (b, 0) };
        let digits = [
            2,
            a,
            a_sign,
            (mag / 100) as u8,
            ((mag / 10) % 10) as u8,
            (mag % 10) as u8,
            sign,
        ];
        Gene::from_digits(&digits)
    }

    #[test]
    fn identity_is_total() {
        let gene = Gene::from_digits(&[1]);
        assert_eq!(gene.apply(5).unwrap(), 5);
        assert_eq!(gene.apply(-5).unwrap(), -5);
    }

    #[test]
    fn affine_two_x_plus_one() {
        let gene = affine(2, 0, 1);
        assert_eq!(gene.apply(4).unwrap(), 9);
        assert_eq!(gene.describe(), "y = 2·x + 1");
    }

    #[test]
    fn affine_handles_negative_slope_and_intercept() {
        let gene = affine(3, 1, -7);
        assert_eq!(gene.apply(2).unwrap(), -13);
        assert_eq!(gene.describe(), "y = -3·x - 7");
    }

    #[test]
    fn mod_step_zero_modulus_is_domain_error() {
        let digits = [4, 0, 0, 0, 0, 0, 0, 0];
        let gene = Gene::from_digits(&digits);
        assert_eq!(gene.apply(5).unwrap_err(), GeneError::DivisionByZero);
    }

    #[test]
    fn undefined_opcode_is_domain_error() {
        let gene = Gene::from_digits(&[9, 1, 2, 3]);
        assert_eq!(gene.apply(0).unwrap_err(), GeneError::UndefinedSlot(9));
    }

    #[test]
    fn affine_saturates_instead_of_overflowing() {
        let gene = affine(9, 0, 999);
        let y = gene.apply(i32::MAX).unwrap();
        assert_eq!(y, i32::MAX);
    }

    #[test]
    fn describe_is_pure_and_deterministic() {
        let gene = affine(2, 0, 1);
        assert_eq!(gene.describe(), gene.describe());
    }

    #[test]
    fn describe_composition_nests_bare_affine_text() {
        // opcode 5: compose (a1=2,b1=1) then (a2=3,b2=-7) -> no doubled "y = ".
        let digits = [5, 2, 0, 0, 0, 1, 0, 3, 0, 0, 0, 7, 1];
        let gene = Gene::from_digits(&digits);
        assert_eq!(gene.describe(), "y = 3·x - 7 of (2·x + 1)");
    }

    #[test]
    fn describe_never_exceeds_128_bytes() {
        for opcode in 0..=9u8 {
            let digits = vec![opcode; GENE_CAPACITY];
            let gene = Gene::from_digits(&digits);
            assert!(gene.describe().len() <= 128);
        }
    }

    #[test]
    fn equality_is_length_and_digits() {
        let a = Gene::from_digits(&[1, 2, 3]);
        let b = Gene::from_digits(&[1, 2, 3]);
        let c = Gene::from_digits(&[1, 2]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
