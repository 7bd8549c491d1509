//! Synthetic source for demos and tests
//!
//! Produces a fresh batch of random notifications on every call.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use uuid::Uuid;

use super::trait_::Source;
use crate::models::{NotificationRecord, PLACEHOLDER_LINK, SourceKind};

const MIN_BATCH: usize = 5;
const MAX_BATCH: usize = 10;

const NOTIFICATION_TYPES: [&str; 5] = [
    "Task Update",
    "Meeting Reminder",
    "System Alert",
    "Project Milestone",
    "Team Message",
];

const MOCK_USERS: [&str; 5] = [
    "Alice Smith",
    "Bob Johnson",
    "Carol Williams",
    "David Brown",
    "Eve Davis",
];

#[derive(Debug, Default, Clone)]
pub struct MockSource;

impl MockSource {
    pub fn new() -> Self {
        Self
    }

    fn generate(rng: &mut impl Rng) -> NotificationRecord {
        let kind = pick(rng, &NOTIFICATION_TYPES);
        let from = pick(rng, &MOCK_USERS);
        let age = Duration::milliseconds(rng.gen_range(0..24 * 60 * 60 * 1000));

        NotificationRecord::new(
            SourceKind::Synthetic,
            title_for(rng, kind),
            from,
            Utc::now() - age,
            rng.gen_bool(0.5),
            PLACEHOLDER_LINK,
        )
        .with_id(format!("mock-{}", Uuid::new_v4()))
        .with_kind(kind)
    }
}

fn pick<'a>(rng: &mut impl Rng, items: &[&'a str]) -> &'a str {
    items.choose(rng).copied().unwrap_or_default()
}

fn title_for(rng: &mut impl Rng, kind: &str) -> String {
    match kind {
        "Task Update" => format!(
            "Task {}: {}",
            rng.gen_range(0..100),
            pick(
                rng,
                &[
                    "Update documentation",
                    "Fix bug in login flow",
                    "Implement new feature",
                    "Review pull request",
                    "Update dependencies",
                ],
            )
        ),
        "Meeting Reminder" => format!(
            "Meeting: {}",
            pick(
                rng,
                &[
                    "Weekly Standup",
                    "Project Planning",
                    "Code Review",
                    "Team Sync",
                    "Client Demo",
                ],
            )
        ),
        "System Alert" => format!(
            "Alert: {}",
            pick(
                rng,
                &[
                    "High CPU Usage",
                    "Low Disk Space",
                    "Service Downtime",
                    "Security Update Required",
                    "Database Backup Completed",
                ],
            )
        ),
        "Project Milestone" => format!(
            "Milestone: {}",
            pick(
                rng,
                &[
                    "Version 1.0 Released",
                    "Beta Testing Complete",
                    "100 Users Milestone",
                    "First Customer Onboarded",
                    "Security Audit Passed",
                ],
            )
        ),
        "Team Message" => pick(
            rng,
            &[
                "New team member joining next week",
                "Office closed for holiday",
                "Team lunch on Friday",
                "New project kickoff",
                "Congratulations on the launch!",
            ],
        )
        .to_string(),
        _ => "Generic Notification".to_string(),
    }
}

#[async_trait]
impl Source for MockSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Synthetic
    }

    async fn fetch_notifications(&self) -> Vec<NotificationRecord> {
        let mut rng = rand::thread_rng();
        let count = rng.gen_range(MIN_BATCH..=MAX_BATCH);
        (0..count).map(|_| Self::generate(&mut rng)).collect()
    }
}
