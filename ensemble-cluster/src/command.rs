//! Commands and their responses
//!
//! A command is created per request, routed to a node and consumed once by
//! that node's pipeline. Most commands run against the [`Store`]; the
//! membership query runs against the [`Router`] of the receiving node.

use crate::error::{EnsembleError, Result};
use crate::router::Router;
use crate::store::Store;
use crate::types::{MembershipView, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What a command executes against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Store,
    Router,
}

/// A request travelling through the pipeline and over the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    AddBucket {
        bucket: String,
    },
    RemoveBucket {
        bucket: String,
    },
    GetBuckets,
    GetKeys {
        bucket: String,
    },
    GetValue {
        bucket: String,
        key: String,
    },
    GetValues {
        bucket: String,
        keys: Vec<String>,
    },
    PutValue {
        bucket: String,
        key: String,
        value: Value,
    },
    RemoveValue {
        bucket: String,
        key: String,
    },
    RemoveValues {
        bucket: String,
        keys: Vec<String>,
    },
    /// Range query over the lexicographic key order
    KeysInRange {
        bucket: String,
        start: String,
        end: Option<String>,
        limit: Option<usize>,
    },
    /// Ask the receiving node for its cluster's membership view
    Membership,
}

/// Outcome of a successfully executed command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Done,
    Buckets(Vec<String>),
    Keys(Vec<String>),
    Value(Option<Value>),
    Values(BTreeMap<String, Value>),
    Membership(MembershipView),
}

impl Command {
    pub fn target(&self) -> Target {
        match self {
            Command::Membership => Target::Router,
            _ => Target::Store,
        }
    }

    /// Short name for logs and metric labels
    pub fn name(&self) -> &'static str {
        match self {
            Command::AddBucket { .. } => "add_bucket",
            Command::RemoveBucket { .. } => "remove_bucket",
            Command::GetBuckets => "get_buckets",
            Command::GetKeys { .. } => "get_keys",
            Command::GetValue { .. } => "get_value",
            Command::GetValues { .. } => "get_values",
            Command::PutValue { .. } => "put_value",
            Command::RemoveValue { .. } => "remove_value",
            Command::RemoveValues { .. } => "remove_values",
            Command::KeysInRange { .. } => "keys_in_range",
            Command::Membership => "membership",
        }
    }

    pub fn execute_on_store(&self, store: &dyn Store) -> Result<Response> {
        match self {
            Command::AddBucket { bucket } => store.add_bucket(bucket).map(|_| Response::Done),
            Command::RemoveBucket { bucket } => {
                store.remove_bucket(bucket).map(|_| Response::Done)
            }
            Command::GetBuckets => Ok(Response::Buckets(store.buckets())),
            Command::GetKeys { bucket } => store.keys(bucket).map(Response::Keys),
            Command::GetValue { bucket, key } => store.get_value(bucket, key).map(Response::Value),
            Command::GetValues { bucket, keys } => {
                store.get_values(bucket, keys).map(Response::Values)
            }
            Command::PutValue { bucket, key, value } => store
                .put_value(bucket, key, value.clone())
                .map(|_| Response::Done),
            Command::RemoveValue { bucket, key } => {
                store.remove_value(bucket, key).map(|_| Response::Done)
            }
            Command::RemoveValues { bucket, keys } => {
                store.remove_values(bucket, keys).map(|_| Response::Done)
            }
            Command::KeysInRange {
                bucket,
                start,
                end,
                limit,
            } => store
                .keys_in_range(bucket, start, end.as_deref(), *limit)
                .map(Response::Keys),
            Command::Membership => Err(EnsembleError::Processing(
                "membership command cannot execute on a store".to_string(),
            )),
        }
    }

    pub fn execute_on_router(&self, router: &Router) -> Result<Response> {
        match self {
            Command::Membership => router.membership_view().map(Response::Membership),
            other => Err(EnsembleError::Processing(format!(
                "{} command cannot execute on a router",
                other.name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_targets() {
        assert_eq!(Command::Membership.target(), Target::Router);
        assert_eq!(Command::GetBuckets.target(), Target::Store);
        assert_eq!(
            Command::GetValue {
                bucket: "b".into(),
                key: "k".into()
            }
            .target(),
            Target::Store
        );
    }

    #[test]
    fn test_execute_on_store() {
        let store = MemoryStore::new();
        let put = Command::PutValue {
            bucket: "b".into(),
            key: "k".into(),
            value: Value::from("v"),
        };
        assert_eq!(put.execute_on_store(&store).unwrap(), Response::Done);

        let get = Command::GetValue {
            bucket: "b".into(),
            key: "k".into(),
        };
        assert_eq!(
            get.execute_on_store(&store).unwrap(),
            Response::Value(Some(Value::from("v")))
        );

        let range = Command::KeysInRange {
            bucket: "b".into(),
            start: "a".into(),
            end: None,
            limit: Some(10),
        };
        assert_eq!(
            range.execute_on_store(&store).unwrap(),
            Response::Keys(vec!["k".into()])
        );
    }

    #[test]
    fn test_store_failure_is_processing_error() {
        let store = MemoryStore::new();
        let cmd = Command::GetKeys {
            bucket: "missing".into(),
        };
        let err = cmd.execute_on_store(&store).unwrap_err();
        assert!(matches!(err, EnsembleError::Processing(_)));
    }

    #[test]
    fn test_membership_rejected_by_store() {
        let store = MemoryStore::new();
        assert!(Command::Membership.execute_on_store(&store).is_err());
    }

    #[test]
    fn test_command_serde() {
        let cmd = Command::GetValues {
            bucket: "b".into(),
            keys: vec!["k1".into(), "k2".into()],
        };
        let json = serde_json::to_string(&cmd).unwrap();
        let back: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cmd);
    }
}
