//! Canned story templates keyed by topic.

use crate::models::{StoryResponse, TopicSummary};
use std::str::FromStr;
use thiserror::Error;

/// Replaced (first occurrence only) by the child's trimmed name.
pub const CHILD_PLACEHOLDER: &str = "{child}";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoryError {
    #[error("חסר שם ילד/ה")]
    EmptyName,

    #[error("נושא לא חוקי")]
    UnknownTopic(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Space,
    Ocean,
    Jungle,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::Space, Topic::Ocean, Topic::Jungle];

    pub fn key(&self) -> &'static str {
        match self {
            Topic::Space => "space",
            Topic::Ocean => "ocean",
            Topic::Jungle => "jungle",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Topic::Space => "הרפתקה בחלל",
            Topic::Ocean => "מסע בים",
            Topic::Jungle => "ג׳ונגל מסתורי",
        }
    }

    fn template(&self) -> &'static str {
        match self {
            Topic::Space => {
                "יום אחד, {child}, גילית דלת סודית לחללית קטנה מאחורי הספרייה. \
                 בלחיצה אחת — שיגור! בדרך פגשת כוכב שמדבר רק בחידות..."
            }
            Topic::Ocean => {
                "{child} ירד/ה לחוף ומצא/ה בקבוק עם מפה עתיקה. \
                 המפה הובילה לאי קטן, ושם חיכתה קונכייה שמגשימה משאלות..."
            }
            Topic::Jungle => {
                "בבוקר חמים, {child} נכנס/ה לשביל ירוק בג׳ונגל. \
                 פתאום נשמע קול: 'רק אמיצים ממשיכים!' ואז הופיע קוף עם כובע..."
            }
        }
    }
}

impl FromStr for Topic {
    type Err = StoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim();
        Topic::ALL
            .into_iter()
            .find(|topic| topic.key() == key)
            .ok_or_else(|| StoryError::UnknownTopic(key.to_string()))
    }
}

pub fn list_topics() -> Vec<TopicSummary> {
    Topic::ALL
        .iter()
        .map(|topic| TopicSummary {
            key: topic.key().to_string(),
            title: topic.title().to_string(),
        })
        .collect()
}

/// Fill the topic's template with the child's name.
///
/// The name is checked before the topic, so a request missing both reports
/// the missing name.
pub fn generate(child_name: &str, topic_key: &str) -> Result<StoryResponse, StoryError> {
    let child = child_name.trim();
    if child.is_empty() {
        return Err(StoryError::EmptyName);
    }

    let topic: Topic = topic_key.parse()?;

    Ok(StoryResponse {
        topic_title: topic.title().to_string(),
        story: topic.template().replacen(CHILD_PLACEHOLDER, child, 1),
    })
}
