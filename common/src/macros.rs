/// Declares a UUID-backed identifier newtype.
#[macro_export]
macro_rules! id_type {
    ($name:ident) => {
        #[derive(
            Clone,
            Copy,
            PartialEq,
            Eq,
            Ord,
            PartialOrd,
            Debug,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[repr(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            pub fn unique() -> $name {
                $name(uuid::Uuid::new_v4())
            }
            pub fn nil() -> $name {
                $name(uuid::Uuid::nil())
            }
            pub const fn from_u128(value: u128) -> $name {
                $name(uuid::Uuid::from_u128(value))
            }
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
            pub fn as_uuid(&self) -> uuid::Uuid {
                self.0
            }
        }

        impl From<uuid::Uuid> for $name {
            fn from(uuid: uuid::Uuid) -> $name {
                $name(uuid)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    id_type!(ProbeId);

    #[test]
    fn test_unique_ids_differ() {
        let a = ProbeId::unique();
        let b = ProbeId::unique();
        assert_ne!(a, b);
        assert!(!a.is_nil());
        assert!(ProbeId::nil().is_nil());
    }

    #[test]
    fn test_from_u128_round_trips() {
        let id = ProbeId::from_u128(42);
        assert_eq!(id.as_uuid().as_u128(), 42);
        assert_eq!(id.to_string(), "00000000-0000-0000-0000-00000000002a");
    }
}
