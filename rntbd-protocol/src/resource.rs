//! Resource and operation type codes carried in the request frame prefix.
//!
//! Codes are open-ended on the wire, so both types wrap the raw `u16`
//! rather than rejecting values they do not name.

use std::fmt;

macro_rules! wire_codes {
    ($ty:ident { $($name:ident = $code:literal),* $(,)? }) => {
        impl $ty {
            $(pub const $name: $ty = $ty($code);)*

            /// Name of a known code.
            pub fn name(self) -> Option<&'static str> {
                match self.0 {
                    $($code => Some(stringify!($name)),)*
                    _ => None,
                }
            }

            pub fn code(self) -> u16 {
                self.0
            }
        }

        impl From<u16> for $ty {
            fn from(code: u16) -> Self {
                $ty(code)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.name() {
                    Some(name) => f.write_str(name),
                    None => write!(f, "Unknown({:#06x})", self.0),
                }
            }
        }
    };
}

/// Entity a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ResourceType(pub u16);

wire_codes!(ResourceType {
    CONNECTION = 0x0000,
    DATABASE = 0x0001,
    COLLECTION = 0x0002,
    DOCUMENT = 0x0003,
    ATTACHMENT = 0x0004,
    USER = 0x0005,
    PERMISSION = 0x0006,
    STORED_PROCEDURE = 0x0007,
    CONFLICT = 0x0008,
    TRIGGER = 0x0009,
    USER_DEFINED_FUNCTION = 0x000A,
    MODULE = 0x000B,
    REPLICA = 0x000C,
    MODULE_COMMAND = 0x000D,
    RECORD = 0x000E,
    OFFER = 0x000F,
    PARTITION_SET_INFORMATION = 0x0010,
    XP_REPLICATOR_ADDRESS = 0x0011,
    MASTER_PARTITION = 0x0012,
    SERVER_PARTITION = 0x0013,
    DATABASE_ACCOUNT = 0x0014,
    TOPOLOGY = 0x0015,
    PARTITION_KEY_RANGE = 0x0016,
    SCHEMA = 0x0018,
    BATCH_APPLY = 0x0019,
    RESTORE_METADATA = 0x001A,
    COMPUTE_GATEWAY_CHARGES = 0x001B,
    RID_RANGE = 0x001C,
    USER_DEFINED_TYPE = 0x001D,
});

impl ResourceType {
    /// The connection-negotiation message uses resource type zero.
    pub fn is_connection(self) -> bool {
        self == ResourceType::CONNECTION
    }
}

/// Verb a request performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OperationType(pub u16);

wire_codes!(OperationType {
    CONNECTION = 0x0000,
    CREATE = 0x0001,
    UPDATE = 0x0002,
    READ = 0x0003,
    READ_FEED = 0x0004,
    DELETE = 0x0005,
    REPLACE = 0x0006,
    EXECUTE_JAVA_SCRIPT = 0x0008,
    SQL_QUERY = 0x0009,
    PAUSE = 0x000A,
    RESUME = 0x000B,
    STOP = 0x000C,
    RECYCLE = 0x000D,
    CRASH = 0x000E,
    QUERY = 0x000F,
    FORCE_CONFIG_REFRESH = 0x0010,
    HEAD = 0x0011,
    HEAD_FEED = 0x0012,
    UPSERT = 0x0013,
    RECREATE = 0x0014,
    THROTTLE = 0x0015,
    GET_SPLIT_POINT = 0x0016,
    PRE_CREATE_VALIDATION = 0x0017,
    BATCH_APPLY = 0x0018,
    ABORT_SPLIT = 0x0019,
    COMPLETE_SPLIT = 0x001A,
    OFFER_UPDATE_OPERATION = 0x001B,
    OFFER_PRE_GROW_VALIDATION = 0x001C,
    BATCH_REPORT_THROUGHPUT_UTILIZATION = 0x001D,
    PRE_REPLACE_VALIDATION = 0x001E,
    MIGRATE_PARTITION = 0x001F,
    BATCH = 0x0025,
});

impl OperationType {
    /// Returns whether the operation mutates data.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            OperationType::CREATE
                | OperationType::DELETE
                | OperationType::RECREATE
                | OperationType::EXECUTE_JAVA_SCRIPT
                | OperationType::REPLACE
                | OperationType::UPSERT
                | OperationType::UPDATE
                | OperationType::BATCH
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(ResourceType::DOCUMENT.to_string(), "DOCUMENT");
        assert_eq!(OperationType::READ.to_string(), "READ");
        assert_eq!(ResourceType(99).to_string(), "Unknown(0x0063)");
        assert_eq!(OperationType::from(0x0013), OperationType::UPSERT);
        assert!(ResourceType(0).is_connection());
        assert!(!ResourceType::DOCUMENT.is_connection());
    }

    #[test]
    fn test_is_write() {
        let writes = [
            OperationType::CREATE,
            OperationType::DELETE,
            OperationType::RECREATE,
            OperationType::EXECUTE_JAVA_SCRIPT,
            OperationType::REPLACE,
            OperationType::UPSERT,
            OperationType::UPDATE,
            OperationType::BATCH,
        ];
        for op in writes {
            assert!(op.is_write(), "{op}");
        }
        assert!(!OperationType::READ.is_write());
        assert!(!OperationType::QUERY.is_write());
        assert!(!OperationType::HEAD.is_write());
        assert!(!OperationType(0x7777).is_write());
    }
}
