//! Room and membership enums.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of chat room.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatRoomType {
    /// One-to-one conversation.
    Direct,
    /// Group conversation.
    #[default]
    Group,
    /// Public channel.
    Channel,
}

/// Role of a member inside a room.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberRole {
    /// Room creator.
    Owner,
    /// Moderator.
    Admin,
    /// Regular member.
    #[default]
    Member,
}

impl ChatRoomType {
    /// Stable string form, as stored and sent on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "DIRECT",
            Self::Group => "GROUP",
            Self::Channel => "CHANNEL",
        }
    }
}

impl MemberRole {
    /// Stable string form, as stored and sent on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "OWNER",
            Self::Admin => "ADMIN",
            Self::Member => "MEMBER",
        }
    }
}

impl fmt::Display for ChatRoomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatRoomType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DIRECT" => Ok(Self::Direct),
            "GROUP" => Ok(Self::Group),
            "CHANNEL" => Ok(Self::Channel),
            other => Err(format!("unknown room type: {other}")),
        }
    }
}

impl FromStr for MemberRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OWNER" => Ok(Self::Owner),
            "ADMIN" => Ok(Self::Admin),
            "MEMBER" => Ok(Self::Member),
            other => Err(format!("unknown member role: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_type_string_roundtrip() {
        for t in [ChatRoomType::Direct, ChatRoomType::Group, ChatRoomType::Channel] {
            assert_eq!(t.as_str().parse::<ChatRoomType>().unwrap(), t);
        }
    }

    #[test]
    fn role_serde_matches_as_str() {
        let json = serde_json::to_string(&MemberRole::Owner).unwrap();
        assert_eq!(json, "\"OWNER\"");
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!("GUEST".parse::<MemberRole>().is_err());
    }

    #[test]
    fn defaults() {
        assert_eq!(ChatRoomType::default(), ChatRoomType::Group);
        assert_eq!(MemberRole::default(), MemberRole::Member);
    }
}
