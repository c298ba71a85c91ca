//! Well-known notification topics emitted by the pipeline.

use crate::event_bus::Topic;

pub const TOPIC_ISSUE_DETECTED: Topic = Topic("issue.detected");
pub const TOPIC_FIX_GENERATED: Topic = Topic("fix.generated");
pub const TOPIC_FIX_APPLIED: Topic = Topic("fix.applied");
pub const TOPIC_FIX_ROLLED_BACK: Topic = Topic("fix.rolled_back");
pub const TOPIC_FIX_HELD: Topic = Topic("fix.held_for_approval");
pub const TOPIC_DEPLOYMENT_OUTCOME: Topic = Topic("deployment.outcome");
pub const TOPIC_CRAWL_FINISHED: Topic = Topic("crawl.finished");
pub const TOPIC_FILE_QUARANTINED: Topic = Topic("file.quarantined");
