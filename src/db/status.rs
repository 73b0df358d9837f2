/// Replica set status (`replSetGetStatus`)
use serde::{Deserialize, Serialize};
use std::fmt;

/// Member state as reported by `replSetGetStatus`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum MemberState {
    Startup,
    Primary,
    Secondary,
    Recovering,
    Startup2,
    Unknown,
    Arbiter,
    Down,
    Rollback,
    Removed,
}

impl From<i32> for MemberState {
    fn from(state: i32) -> Self {
        match state {
            0 => MemberState::Startup,
            1 => MemberState::Primary,
            2 => MemberState::Secondary,
            3 => MemberState::Recovering,
            5 => MemberState::Startup2,
            7 => MemberState::Arbiter,
            8 => MemberState::Down,
            9 => MemberState::Rollback,
            10 => MemberState::Removed,
            _ => MemberState::Unknown,
        }
    }
}

impl From<MemberState> for i32 {
    fn from(state: MemberState) -> Self {
        match state {
            MemberState::Startup => 0,
            MemberState::Primary => 1,
            MemberState::Secondary => 2,
            MemberState::Recovering => 3,
            MemberState::Startup2 => 5,
            MemberState::Unknown => 6,
            MemberState::Arbiter => 7,
            MemberState::Down => 8,
            MemberState::Rollback => 9,
            MemberState::Removed => 10,
        }
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemberState::Startup => "STARTUP",
            MemberState::Primary => "PRIMARY",
            MemberState::Secondary => "SECONDARY",
            MemberState::Recovering => "RECOVERING",
            MemberState::Startup2 => "STARTUP2",
            MemberState::Unknown => "UNKNOWN",
            MemberState::Arbiter => "ARBITER",
            MemberState::Down => "DOWN",
            MemberState::Rollback => "ROLLBACK",
            MemberState::Removed => "REMOVED",
        };
        write!(f, "{}", name)
    }
}

/// One member of the replica set status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMember {
    #[serde(rename = "_id")]
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub health: f64,
    pub state: MemberState,
    #[serde(rename = "stateStr", default)]
    pub state_str: String,
}

/// Replica set status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplsetStatus {
    pub set: String,
    pub members: Vec<StatusMember>,
}

impl ReplsetStatus {
    pub fn primary(&self) -> Option<&StatusMember> {
        self.members.iter().find(|m| m.state == MemberState::Primary)
    }

    pub fn member(&self, name: &str) -> Option<&StatusMember> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn members_by_state(&self, state: MemberState) -> impl Iterator<Item = &StatusMember> {
        self.members.iter().filter(move |m| m.state == state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{self, doc};

    #[test]
    fn test_member_state_codes() {
        assert_eq!(MemberState::from(1), MemberState::Primary);
        assert_eq!(MemberState::from(8), MemberState::Down);
        assert_eq!(MemberState::from(42), MemberState::Unknown);
        assert_eq!(i32::from(MemberState::Down), 8);
        assert_eq!(MemberState::Secondary.to_string(), "SECONDARY");
    }

    #[test]
    fn test_decode_status() {
        let document = doc! {
            "set": "rs",
            "myState": 1,
            "members": [
                { "_id": 0, "name": "db-0:27017", "health": 1.0, "state": 1, "stateStr": "PRIMARY" },
                { "_id": 1, "name": "db-1:27017", "health": 0.0, "state": 8, "stateStr": "(not reachable/healthy)" },
                { "_id": 2, "name": "db-2:27017", "health": 1.0, "state": 2, "stateStr": "SECONDARY" },
            ],
            "ok": 1.0,
        };

        let status: ReplsetStatus = bson::from_document(document).unwrap();
        assert_eq!(status.set, "rs");
        assert_eq!(status.primary().map(|m| m.name.as_str()), Some("db-0:27017"));

        let down: Vec<_> = status.members_by_state(MemberState::Down).collect();
        assert_eq!(down.len(), 1);
        assert_eq!(down[0].name, "db-1:27017");
    }
}
