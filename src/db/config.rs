/// Replica set configuration document (`replSetGetConfig` / `replSetReconfig`)
use mongodb::bson::Document;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Highest member `_id` MongoDB accepts
pub const MAX_MEMBER_ID: i32 = 255;

/// Replica set configuration
///
/// Fields the watchdog does not interpret (`protocolVersion`, `settings`,
/// ...) are kept in `extra` so a read-modify-write does not drop them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplsetConfig {
    #[serde(rename = "_id")]
    pub name: String,
    pub version: i64,
    pub members: Vec<ConfigMember>,
    #[serde(flatten)]
    pub extra: Document,
}

/// A single member entry of the replica set configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMember {
    #[serde(rename = "_id")]
    pub id: i32,
    pub host: String,
    #[serde(default)]
    pub arbiter_only: bool,
    #[serde(default = "default_build_indexes")]
    pub build_indexes: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default = "default_priority")]
    pub priority: f64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default = "default_votes")]
    pub votes: i32,
    #[serde(flatten)]
    pub extra: Document,
}

fn default_build_indexes() -> bool {
    true
}

fn default_priority() -> f64 {
    1.0
}

fn default_votes() -> i32 {
    1
}

impl ConfigMember {
    /// A voting, electable member
    pub fn new(id: i32, host: &str) -> Self {
        Self {
            id,
            host: host.to_string(),
            arbiter_only: false,
            build_indexes: true,
            hidden: false,
            priority: 1.0,
            tags: BTreeMap::new(),
            votes: 1,
            extra: Document::new(),
        }
    }

    pub fn is_voting(&self) -> bool {
        self.votes > 0
    }

    /// Give the member a vote and make it electable
    pub fn promote(&mut self) {
        self.votes = 1;
        self.priority = 1.0;
    }

    /// Take the vote away; non-voting members must have priority 0
    pub fn demote(&mut self) {
        self.votes = 0;
        self.priority = 0.0;
    }

    pub fn has_tag(&self, key: &str, value: &str) -> bool {
        self.tags.get(key).map(|v| v == value).unwrap_or(false)
    }
}

impl ReplsetConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: 1,
            members: Vec::new(),
            extra: Document::new(),
        }
    }

    /// Find a member by host:port
    pub fn member(&self, host: &str) -> Option<&ConfigMember> {
        self.members.iter().find(|m| m.host == host)
    }

    pub fn has_member(&self, host: &str) -> bool {
        self.member(host).is_some()
    }

    pub fn add_member(&mut self, member: ConfigMember) {
        self.members.push(member);
    }

    /// Remove a member by host:port, returning it if it was present
    pub fn remove_member(&mut self, host: &str) -> Option<ConfigMember> {
        let index = self.members.iter().position(|m| m.host == host)?;
        Some(self.members.remove(index))
    }

    /// Lowest unused member id
    pub fn next_member_id(&self) -> Option<i32> {
        (0..=MAX_MEMBER_ID).find(|id| self.members.iter().all(|m| m.id != *id))
    }

    pub fn voting_members(&self) -> usize {
        self.members.iter().filter(|m| m.is_voting()).count()
    }

    pub fn increment_version(&mut self) {
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{self, doc};

    fn sample_config() -> ReplsetConfig {
        let mut config = ReplsetConfig::new("rs");
        config.add_member(ConfigMember::new(0, "db-0:27017"));
        config.add_member(ConfigMember::new(1, "db-1:27017"));
        config.add_member(ConfigMember::new(3, "db-3:27017"));
        config
    }

    #[test]
    fn test_member_lookup() {
        let config = sample_config();
        assert!(config.has_member("db-1:27017"));
        assert!(!config.has_member("db-2:27017"));
        assert_eq!(config.member("db-3:27017").map(|m| m.id), Some(3));
    }

    #[test]
    fn test_next_member_id_fills_gaps() {
        let config = sample_config();
        assert_eq!(config.next_member_id(), Some(2));
    }

    #[test]
    fn test_remove_member() {
        let mut config = sample_config();
        let removed = config.remove_member("db-1:27017");
        assert_eq!(removed.map(|m| m.id), Some(1));
        assert_eq!(config.members.len(), 2);
        assert!(config.remove_member("db-1:27017").is_none());
    }

    #[test]
    fn test_promote_demote() {
        let mut member = ConfigMember::new(4, "db-4:27017");
        member.demote();
        assert!(!member.is_voting());
        assert_eq!(member.priority, 0.0);

        member.promote();
        assert!(member.is_voting());
        assert_eq!(member.priority, 1.0);
    }

    #[test]
    fn test_decode_server_document() {
        let document = doc! {
            "_id": "rs",
            "version": 4,
            "protocolVersion": 1i64,
            "members": [
                { "_id": 0, "host": "db-0:27017", "priority": 1, "votes": 1, "tags": { "dcosFramework": "mongo" } },
                { "_id": 1, "host": "db-1:27017", "hidden": true, "priority": 0.0, "votes": 0, "secondaryDelaySecs": 0i64 },
            ],
            "settings": { "chainingAllowed": true },
        };

        let config: ReplsetConfig = bson::from_document(document).unwrap();
        assert_eq!(config.name, "rs");
        assert_eq!(config.version, 4);
        assert_eq!(config.voting_members(), 1);
        assert!(config.members[0].has_tag("dcosFramework", "mongo"));
        assert!(config.members[1].hidden);
        assert!(config.members[1].extra.contains_key("secondaryDelaySecs"));
        assert!(config.extra.contains_key("settings"));

        let encoded = bson::to_document(&config).unwrap();
        assert_eq!(encoded.get_str("_id").unwrap(), "rs");
        assert!(encoded.contains_key("protocolVersion"));
        assert!(encoded.contains_key("settings"));
    }
}
