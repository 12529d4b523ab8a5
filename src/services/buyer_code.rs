use rand::Rng;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use tracing::{info, warn};

use crate::entities::order::{self, Entity as OrderEntity};
use crate::errors::ServiceError;

/// Alphabet for generated codes. Ambiguous glyphs (0/O, 1/I) are excluded
/// so codes survive being read aloud or handwritten.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_PREFIX: &str = "C-";
const CODE_LEN: usize = 6;
const MAX_PROBES: usize = 6;

/// Contact fields used to prove ownership of a reused code.
#[derive(Debug, Clone, Default)]
pub struct BuyerContact {
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl BuyerContact {
    /// Two contacts refer to the same buyer when the email OR the phone
    /// matches. Both sides must actually carry the field for it to count.
    fn matches(&self, other_email: &Option<String>, other_phone: &Option<String>) -> bool {
        let email_match = match (&self.email, other_email) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        };
        let phone_match = match (&self.phone, other_phone) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
        email_match || phone_match
    }
}

/// Resolves the buyer code for a checkout. Runs inside the checkout
/// transaction so the collision probe and the eventual order insert see the
/// same snapshot.
///
/// - A supplied code is reused only when the most recent order carrying it
///   belongs to the same buyer (matching email or phone); a first-time code
///   is accepted as-is.
/// - With `generate` set and no code supplied, a fresh unique code is minted.
/// - Otherwise the order is created without a code.
pub async fn resolve_buyer_code<C: ConnectionTrait>(
    conn: &C,
    supplied: Option<&str>,
    contact: &BuyerContact,
    generate: bool,
) -> Result<Option<String>, ServiceError> {
    if let Some(code) = supplied {
        // Codes are stored and compared uppercase; accept however the buyer
        // typed it.
        let code = code.trim().to_uppercase();
        if code.is_empty() {
            return Err(ServiceError::ValidationError(
                "buyer code must not be empty".into(),
            ));
        }

        let previous = OrderEntity::find()
            .filter(order::Column::BuyerCode.eq(code.as_str()))
            .order_by_desc(order::Column::CreatedAt)
            .one(conn)
            .await?;

        return match previous {
            None => Ok(Some(code)),
            Some(prev) if contact.matches(&prev.buyer_email, &prev.buyer_phone) => {
                Ok(Some(code))
            }
            Some(_) => Err(ServiceError::Conflict(
                "buyer code already used by a different buyer".into(),
            )),
        };
    }

    if !generate {
        return Ok(None);
    }

    for _ in 0..MAX_PROBES {
        let candidate = random_code();
        let taken = OrderEntity::find()
            .filter(order::Column::BuyerCode.eq(candidate.as_str()))
            .one(conn)
            .await?
            .is_some();
        if !taken {
            return Ok(Some(candidate));
        }
        info!(code = %candidate, "buyer code collision, retrying");
    }

    // All probes collided. A timestamp-derived code guarantees termination;
    // the code column is not unique at the storage layer (one buyer's code
    // repeats across their orders), so millisecond resolution is what keeps
    // concurrent fallbacks apart.
    let fallback = fallback_code(chrono::Utc::now().timestamp_millis() as u64);
    warn!(code = %fallback, "buyer code probes exhausted, using timestamp fallback");
    Ok(Some(fallback))
}

fn random_code() -> String {
    let mut rng = rand::thread_rng();
    let body: String = (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    format!("{}{}", CODE_PREFIX, body)
}

fn fallback_code(millis: u64) -> String {
    format!("{}{}", CODE_PREFIX, to_base36(millis))
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_code_shape() {
        for _ in 0..100 {
            let code = random_code();
            assert!(code.starts_with(CODE_PREFIX));
            let body = &code[CODE_PREFIX.len()..];
            assert_eq!(body.len(), CODE_LEN);
            for c in body.bytes() {
                assert!(CODE_ALPHABET.contains(&c), "unexpected char in {}", code);
                assert!(!b"0O1I".contains(&c), "ambiguous char in {}", code);
            }
        }
    }

    #[test]
    fn base36_encoding() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "Z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(36 * 36 + 35), "10Z");
    }

    #[test]
    fn fallback_code_carries_prefix() {
        assert_eq!(fallback_code(36), "C-10");
    }

    #[test]
    fn contact_match_requires_field_on_both_sides() {
        let contact = BuyerContact {
            email: Some("ana@example.com".into()),
            phone: None,
        };
        assert!(contact.matches(&Some("ANA@example.com".into()), &None));
        assert!(!contact.matches(&None, &None));
        assert!(!contact.matches(&Some("other@example.com".into()), &Some("555".into())));

        let by_phone = BuyerContact {
            email: None,
            phone: Some("555-1234".into()),
        };
        assert!(by_phone.matches(&None, &Some("555-1234".into())));
        assert!(!by_phone.matches(&None, &Some("555-9999".into())));
    }
}
