use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub const NULL: $name = $name(0);

            pub fn is_null(self) -> bool {
                self.0 == 0
            }

            /// Parse the key form written by `Display`
            pub fn parse_key(text: &str) -> Option<Self> {
                parse_key(text).map($name)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write_key(f, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(v: u64) -> Self {
                $name(v)
            }
        }
    };
}

define_id!(
    /// A world object hosting scripts
    ObjectId
);
define_id!(
    /// A script item in an object's inventory
    ItemId
);
define_id!(
    /// An avatar
    AgentId
);

/// Ids render as keys: `00000000-0000-0000-hhhh-llllllllllll`
fn write_key(f: &mut fmt::Formatter<'_>, v: u64) -> fmt::Result {
    write!(
        f,
        "00000000-0000-0000-{:04x}-{:012x}",
        v >> 48,
        v & 0xFFFF_FFFF_FFFF
    )
}

fn parse_key(text: &str) -> Option<u64> {
    let rest = text.strip_prefix("00000000-0000-0000-")?;
    let (hi, lo) = rest.split_once('-')?;
    if hi.len() != 4 || lo.len() != 12 {
        return None;
    }
    let hi = u64::from_str_radix(hi, 16).ok()?;
    let lo = u64::from_str_radix(lo, 16).ok()?;
    Some((hi << 48) | lo)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_form() {
        let id = ItemId(42);
        assert_eq!(id.to_string(), "00000000-0000-0000-0000-00000000002a");
        assert_eq!(ItemId::parse_key(&id.to_string()), Some(id));
    }

    #[test]
    fn test_high_bits_survive() {
        let id = ObjectId(0xABCD_0000_0000_0001);
        assert_eq!(ObjectId::parse_key(&id.to_string()), Some(id));
    }

    #[test]
    fn test_rejects_foreign_keys() {
        assert_eq!(AgentId::parse_key("not-a-key"), None);
        assert_eq!(
            AgentId::parse_key("12345678-0000-0000-0000-000000000001"),
            None
        );
        assert!(AgentId::NULL.is_null());
    }
}
