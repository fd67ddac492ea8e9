use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(Role {
    Patient => "patient",
    Doctor => "doctor",
});

str_enum!(ConnectionStatus {
    Pending => "pending",
    Accepted => "accepted",
    Declined => "declined",
    Completed => "completed",
    Archived => "archived",
});

impl ConnectionStatus {
    /// Statuses that count as a closed relationship (patient history view).
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Declined | ConnectionStatus::Completed | ConnectionStatus::Archived
        )
    }
}

str_enum!(ManualTaskType {
    Exercise => "exercise",
    Instruction => "instruction",
});

str_enum!(TaskFrequency {
    Daily => "daily",
    AlternateDays => "alternate_days",
});

impl TaskFrequency {
    /// Hours after completion before the task becomes pending again.
    pub fn reset_after_hours(&self) -> i64 {
        match self {
            TaskFrequency::Daily => 24,
            TaskFrequency::AlternateDays => 48,
        }
    }
}

str_enum!(ManualTaskStatus {
    Pending => "pending",
    Completed => "completed",
});

str_enum!(NotificationType {
    Info => "info",
    Decline => "decline",
    Success => "success",
    Warning => "warning",
});
