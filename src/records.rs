use serde::{Deserialize, Serialize};

/// One coloring page as the API reports it. Immutable once handed to the
/// export pipeline; `keyword` feeds filenames and page labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: String,
    pub keyword: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub image_url: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub download_count: u64,
    #[serde(default)]
    pub print_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_cache: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_range: Option<AgeRange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_images: Vec<ImageRecord>,
}

impl ImageRecord {
    /// The API returns relative `imageUrl` values for locally stored pages.
    pub fn absolutize(&mut self, base_url: &str) {
        if !self.image_url.starts_with("http") {
            self.image_url = format!("{}{}", base_url.trim_end_matches('/'), self.image_url);
        }
        for related in &mut self.related_images {
            related.absolutize(base_url);
        }
    }

    /// `Difficulty: … · Age: … yrs` bottom-margin caption, when metadata exists.
    pub fn metadata_label(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(difficulty) = &self.difficulty {
            parts.push(format!("Difficulty: {}", difficulty.as_str()));
        }
        if let Some(age_range) = &self.age_range {
            parts.push(format!("Age: {} yrs", age_range.as_str()));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" \u{b7} "))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Simple,
    Medium,
    Detailed,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Simple => "simple",
            Difficulty::Medium => "medium",
            Difficulty::Detailed => "detailed",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Difficulty::Simple => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Detailed => "Detailed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgeRange {
    #[serde(rename = "2-4")]
    Toddler,
    #[serde(rename = "5-8")]
    Kid,
    #[serde(rename = "9-12")]
    Preteen,
}

impl AgeRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgeRange::Toddler => "2-4",
            AgeRange::Kid => "5-8",
            AgeRange::Preteen => "9-12",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub label: String,
    pub emoji: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pack {
    pub id: String,
    pub title: String,
    pub emoji: String,
    pub description: String,
    pub category: String,
    pub difficulty: String,
    pub age_range: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_ready: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Newest,
    Popular,
}

/// Query parameters for `/api/gallery`.
#[derive(Debug, Clone, Default)]
pub struct GalleryParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub category: Option<String>,
    pub sort: Option<SortOrder>,
    pub search: Option<String>,
    pub difficulty: Option<String>,
    pub age_range: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryResponse {
    pub images: Vec<ImageRecord>,
    pub total: u64,
    pub page: u32,
    pub total_pages: u32,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub found: bool,
    #[serde(default)]
    pub exact: bool,
    #[serde(default)]
    pub images: Vec<ImageRecord>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub keyword: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_new: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_range: Option<String>,
}

/// Events on the pack generation stream (`/api/packs/{id}/generate-stream`).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PackEvent {
    Status { message: String },
    Progress { current: u64, total: u64, keyword: String },
    Image { image: ImageRecord },
    Complete { total: u64 },
    Fatal { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_record_parses_camel_case_wire_format() {
        let json = r#"{
            "id": "abc",
            "keyword": "red panda",
            "imageUrl": "/images/abc.png",
            "prompt": "a cute red panda",
            "downloadCount": 3,
            "printCount": 1,
            "createdAt": "2026-02-01T00:00:00Z",
            "difficulty": "simple",
            "ageRange": "5-8"
        }"#;
        let record: ImageRecord = serde_json::from_str(json).expect("parse record");
        assert_eq!(record.keyword, "red panda");
        assert_eq!(record.download_count, 3);
        assert_eq!(record.difficulty, Some(Difficulty::Simple));
        assert_eq!(record.age_range, Some(AgeRange::Kid));
    }

    #[test]
    fn absolutize_leaves_absolute_urls_alone() {
        let mut record: ImageRecord =
            serde_json::from_str(r#"{"id":"a","keyword":"cat","imageUrl":"https://cdn.example/cat.png"}"#)
                .expect("parse record");
        record.absolutize("https://api.kidscolor.app");
        assert_eq!(record.image_url, "https://cdn.example/cat.png");
    }

    #[test]
    fn absolutize_prefixes_relative_urls() {
        let mut record: ImageRecord =
            serde_json::from_str(r#"{"id":"a","keyword":"cat","imageUrl":"/images/a.png"}"#)
                .expect("parse record");
        record.absolutize("https://api.kidscolor.app/");
        assert_eq!(record.image_url, "https://api.kidscolor.app/images/a.png");
    }

    #[test]
    fn metadata_label_joins_difficulty_and_age() {
        let mut record: ImageRecord =
            serde_json::from_str(r#"{"id":"a","keyword":"cat","imageUrl":"x"}"#).expect("parse");
        assert_eq!(record.metadata_label(), None);
        record.difficulty = Some(Difficulty::Detailed);
        assert_eq!(record.metadata_label().as_deref(), Some("Difficulty: detailed"));
        record.age_range = Some(AgeRange::Preteen);
        assert_eq!(
            record.metadata_label().as_deref(),
            Some("Difficulty: detailed \u{b7} Age: 9-12 yrs")
        );
    }

    #[test]
    fn pack_events_parse_by_type_tag() {
        let event: PackEvent =
            serde_json::from_str(r#"{"type":"progress","current":2,"total":24,"keyword":"lion"}"#)
                .expect("parse event");
        assert!(matches!(event, PackEvent::Progress { current: 2, total: 24, .. }));

        let event: PackEvent = serde_json::from_str(r#"{"type":"complete","total":24}"#)
            .expect("parse event");
        assert!(matches!(event, PackEvent::Complete { total: 24 }));
    }
}
