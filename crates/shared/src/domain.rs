use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CodeError;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(ChatId);
id_newtype!(FileTransferId);
id_newtype!(MessageId);
id_newtype!(ContactId);

/// Declares a fieldless enum persisted as an integer column.
macro_rules! coded_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $code:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn code(self) -> i64 {
                match self {
                    $(Self::$variant => $code),+
                }
            }
        }

        impl TryFrom<i64> for $name {
            type Error = CodeError;

            fn try_from(code: i64) -> Result<Self, Self::Error> {
                match code {
                    $($code => Ok(Self::$variant),)+
                    _ => Err(CodeError::new(stringify!($name), code)),
                }
            }
        }
    };
}

coded_enum!(
    /// Which side initiated a conversation or transfer.
    ///
    /// `Irrelevant` marks records with no meaningful originator, such as
    /// group chat events generated by the conference focus.
    Direction {
        Incoming = 0,
        Outgoing = 1,
        Irrelevant = 2,
    }
);

coded_enum!(GroupChatState {
    Invited = 0,
    Initiating = 1,
    Started = 2,
    Aborted = 3,
    Failed = 4,
    Accepting = 5,
    Rejected = 6,
});

coded_enum!(GroupChatReasonCode {
    Unspecified = 0,
    AbortedByUser = 1,
    AbortedByRemote = 2,
    AbortedByInactivity = 3,
    RejectedBySecondaryDevice = 4,
    RejectedMaxChats = 5,
    RejectedByUser = 6,
    RejectedByRemote = 7,
    RejectedByTimeout = 8,
    RejectedBySystem = 9,
    FailedInitiation = 10,
});

coded_enum!(FileTransferState {
    Invited = 0,
    Initiating = 1,
    Started = 2,
    Transferred = 3,
    Aborted = 4,
    Failed = 5,
    Paused = 6,
    Rejected = 7,
    Accepting = 8,
    Delivered = 9,
    Displayed = 10,
    Queued = 11,
});

coded_enum!(FileTransferReasonCode {
    Unspecified = 0,
    AbortedByUser = 1,
    AbortedByRemote = 2,
    AbortedBySystem = 3,
    RejectedByUser = 4,
    RejectedByRemote = 5,
    RejectedByTimeout = 6,
    RejectedLowSpace = 7,
    RejectedMaxSize = 8,
    RejectedSpam = 9,
    FailedInitiation = 10,
    FailedDataTransfer = 11,
    FailedSaving = 12,
    FailedDelivery = 13,
    FailedDisplay = 14,
    FailedNotAllowed = 15,
});

coded_enum!(
    /// Membership role of a contact inside a group chat.
    ParticipantRole {
        Invited = 0,
        Connected = 1,
        Departed = 2,
        Declined = 3,
        Failed = 4,
        Timeout = 5,
    }
);

impl ParticipantRole {
    /// Whether the participant occupies a seat in the conversation.
    pub fn holds_seat(self) -> bool {
        matches!(self, Self::Invited | Self::Connected)
    }
}

coded_enum!(DeliveryStatus {
    Queued = 0,
    Sent = 1,
    Delivered = 2,
    Displayed = 3,
    Failed = 4,
});

impl DeliveryStatus {
    pub fn is_delivered(self) -> bool {
        matches!(self, Self::Delivered | Self::Displayed)
    }

    pub fn is_displayed(self) -> bool {
        self == Self::Displayed
    }
}

coded_enum!(DeliveryReasonCode {
    Unspecified = 0,
    FailedDelivery = 1,
    FailedDisplay = 2,
});

coded_enum!(GroupChatEventStatus {
    Joined = 0,
    Departed = 1,
});
