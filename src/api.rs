use anyhow::{Context, Result, anyhow};

use crate::records::{
    Category, GalleryParams, GalleryResponse, GenerateRequest, ImageRecord, Pack, PackEvent,
    SearchResult,
};

/// HTTP client for the KidsColor API server. All endpoints live under the
/// configured base URL; relative image URLs in responses are made absolute
/// before records leave this module.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn gallery(&self, params: &GalleryParams) -> Result<GalleryResponse> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(page) = params.page {
            query.push(("page", page.to_string()));
        }
        if let Some(limit) = params.limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(category) = &params.category {
            query.push(("category", category.clone()));
        }
        if let Some(sort) = &params.sort {
            query.push((
                "sort",
                match sort {
                    crate::records::SortOrder::Newest => "newest".to_string(),
                    crate::records::SortOrder::Popular => "popular".to_string(),
                },
            ));
        }
        if let Some(search) = &params.search {
            query.push(("search", search.clone()));
        }
        if let Some(difficulty) = &params.difficulty {
            query.push(("difficulty", difficulty.clone()));
        }
        if let Some(age_range) = &params.age_range {
            query.push(("ageRange", age_range.clone()));
        }

        let mut response: GalleryResponse = self
            .http
            .get(format!("{}/api/gallery", self.base_url))
            .query(&query)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .with_context(|| "failed to load gallery")?
            .json()
            .await
            .with_context(|| "failed to parse gallery response")?;
        for image in &mut response.images {
            image.absolutize(&self.base_url);
        }
        Ok(response)
    }

    pub async fn popular(&self, limit: u32) -> Result<Vec<ImageRecord>> {
        self.image_list("/api/gallery/popular", limit).await
    }

    pub async fn recent(&self, limit: u32) -> Result<Vec<ImageRecord>> {
        self.image_list("/api/gallery/recent", limit).await
    }

    async fn image_list(&self, path: &str, limit: u32) -> Result<Vec<ImageRecord>> {
        #[derive(serde::Deserialize)]
        struct ImageList {
            images: Vec<ImageRecord>,
        }

        let mut list: ImageList = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .query(&[("limit", limit.to_string())])
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .with_context(|| format!("failed to load {}", path))?
            .json()
            .await
            .with_context(|| format!("failed to parse {} response", path))?;
        for image in &mut list.images {
            image.absolutize(&self.base_url);
        }
        Ok(list.images)
    }

    pub async fn image(&self, id: &str) -> Result<ImageRecord> {
        let mut record: ImageRecord = self
            .http
            .get(format!("{}/api/gallery/{}", self.base_url, id))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .with_context(|| format!("failed to load image {}", id))?
            .json()
            .await
            .with_context(|| "failed to parse image response")?;
        record.absolutize(&self.base_url);
        Ok(record)
    }

    pub async fn search(&self, keyword: &str, category: Option<&str>) -> Result<SearchResult> {
        let mut query = vec![("keyword", keyword.to_string())];
        if let Some(category) = category {
            query.push(("category", category.to_string()));
        }
        let mut result: SearchResult = self
            .http
            .get(format!("{}/api/gallery/search", self.base_url))
            .query(&query)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .with_context(|| format!("failed to search for '{}'", keyword))?
            .json()
            .await
            .with_context(|| "failed to parse search response")?;
        for image in &mut result.images {
            image.absolutize(&self.base_url);
        }
        Ok(result)
    }

    pub async fn categories(&self) -> Result<Vec<Category>> {
        #[derive(serde::Deserialize)]
        struct CategoryList {
            categories: Vec<Category>,
        }

        let list: CategoryList = self
            .http
            .get(format!("{}/api/categories", self.base_url))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .with_context(|| "failed to load categories")?
            .json()
            .await
            .with_context(|| "failed to parse categories response")?;
        Ok(list.categories)
    }

    pub async fn packs(&self) -> Result<Vec<Pack>> {
        #[derive(serde::Deserialize)]
        struct PackList {
            packs: Vec<Pack>,
        }

        let list: PackList = self
            .http
            .get(format!("{}/api/packs", self.base_url))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .with_context(|| "failed to load packs")?
            .json()
            .await
            .with_context(|| "failed to parse packs response")?;
        Ok(list.packs)
    }

    pub async fn pack(&self, id: &str) -> Result<Pack> {
        self.http
            .get(format!("{}/api/packs/{}", self.base_url, id))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .with_context(|| format!("failed to load pack {}", id))?
            .json()
            .await
            .with_context(|| "failed to parse pack response")
    }

    pub async fn generate(&self, request: &GenerateRequest) -> Result<ImageRecord> {
        let mut record: ImageRecord = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(request)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .with_context(|| format!("failed to generate '{}'", request.keyword))?
            .json()
            .await
            .with_context(|| "failed to parse generate response")?;
        record.absolutize(&self.base_url);
        Ok(record)
    }

    /// Opens the pack generation SSE stream. The stream ends after a
    /// `complete` or `fatal` event; dropping it abandons generation early.
    pub async fn stream_pack(&self, id: &str) -> Result<PackStream> {
        let response = self
            .http
            .get(format!("{}/api/packs/{}/generate-stream", self.base_url, id))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .with_context(|| format!("failed to open pack stream {}", id))?;
        Ok(PackStream {
            response,
            buffer: Vec::new(),
            finished: false,
            base_url: self.base_url.clone(),
        })
    }
}

/// Incremental server-sent-events reader over the pack generation response.
/// Buffers raw bytes so a multibyte character split across network chunks is
/// only decoded once its frame is complete.
pub struct PackStream {
    response: reqwest::Response,
    buffer: Vec<u8>,
    finished: bool,
    base_url: String,
}

impl PackStream {
    pub async fn next_event(&mut self) -> Result<Option<PackEvent>> {
        loop {
            if let Some(event) = pop_event(&mut self.buffer, &self.base_url, &mut self.finished)? {
                return Ok(Some(event));
            }
            if self.finished {
                return Ok(None);
            }
            match self
                .response
                .chunk()
                .await
                .with_context(|| "pack stream connection error")?
            {
                Some(chunk) => self.buffer.extend_from_slice(&chunk),
                None => self.finished = true,
            }
        }
    }
}

/// Pops the next complete `data:` frame out of the buffer, if any. Frames
/// are terminated by a blank line per the SSE framing rules; both LF and
/// CRLF line endings are accepted.
fn pop_event(
    buffer: &mut Vec<u8>,
    base_url: &str,
    finished: &mut bool,
) -> Result<Option<PackEvent>> {
    while let Some((pos, delim)) = find_frame_end(buffer) {
        let frame: Vec<u8> = buffer.drain(..pos + delim).collect();
        let frame = String::from_utf8_lossy(&frame);
        for line in frame.lines() {
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() {
                continue;
            }
            let mut event: PackEvent = serde_json::from_str(data)
                .map_err(|err| anyhow!("invalid pack stream event '{}': {}", data, err))?;
            match &mut event {
                PackEvent::Image { image } => image.absolutize(base_url),
                PackEvent::Complete { .. } | PackEvent::Fatal { .. } => *finished = true,
                _ => {}
            }
            return Ok(Some(event));
        }
    }
    Ok(None)
}

fn find_frame_end(buffer: &[u8]) -> Option<(usize, usize)> {
    for index in 0..buffer.len() {
        let rest = &buffer[index..];
        if rest.starts_with(b"\r\n\r\n") {
            return Some((index, 4));
        }
        if rest.starts_with(b"\n\n") {
            return Some((index, 2));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_event_waits_for_a_complete_frame() {
        let mut buffer = b"data: {\"type\":\"status\",\"mes".to_vec();
        let mut finished = false;
        let event = pop_event(&mut buffer, "http://base", &mut finished).expect("pop");
        assert!(event.is_none());

        buffer.extend_from_slice(b"sage\":\"warming up\"}\n\n");
        let event = pop_event(&mut buffer, "http://base", &mut finished)
            .expect("pop")
            .expect("event");
        assert!(matches!(event, PackEvent::Status { message } if message == "warming up"));
        assert!(buffer.is_empty());
    }

    #[test]
    fn image_events_get_absolute_urls() {
        let mut buffer =
            b"data: {\"type\":\"image\",\"image\":{\"id\":\"a\",\"keyword\":\"cat\",\"imageUrl\":\"/images/a.png\"}}\n\n"
                .to_vec();
        let mut finished = false;
        let event = pop_event(&mut buffer, "http://base", &mut finished)
            .expect("pop")
            .expect("event");
        match event {
            PackEvent::Image { image } => {
                assert_eq!(image.image_url, "http://base/images/a.png");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn complete_event_finishes_the_stream() {
        let mut buffer = b"data: {\"type\":\"complete\",\"total\":24}\n\n".to_vec();
        let mut finished = false;
        let event = pop_event(&mut buffer, "http://base", &mut finished)
            .expect("pop")
            .expect("event");
        assert!(matches!(event, PackEvent::Complete { total: 24 }));
        assert!(finished);
    }

    #[test]
    fn comment_and_event_lines_are_skipped() {
        let mut buffer =
            b": keep-alive\n\nevent: message\ndata: {\"type\":\"progress\",\"current\":1,\"total\":24,\"keyword\":\"lion\"}\n\n"
                .to_vec();
        let mut finished = false;
        let event = pop_event(&mut buffer, "http://base", &mut finished)
            .expect("pop")
            .expect("event");
        assert!(matches!(event, PackEvent::Progress { current: 1, .. }));
    }

    #[test]
    fn crlf_framed_events_are_parsed() {
        let mut buffer = b"data: {\"type\":\"complete\",\"total\":24}\r\n\r\n".to_vec();
        let mut finished = false;
        let event = pop_event(&mut buffer, "http://base", &mut finished)
            .expect("pop")
            .expect("event");
        assert!(matches!(event, PackEvent::Complete { total: 24 }));
        assert!(finished);
        assert!(buffer.is_empty());
    }

    #[test]
    fn multibyte_keywords_survive_chunk_splits() {
        let full =
            "data: {\"type\":\"progress\",\"current\":1,\"total\":2,\"keyword\":\"b\u{e4}r\"}\n\n"
                .as_bytes();
        // split in the middle of the two-byte 'ä'
        let split = full.iter().position(|&byte| byte == 0xc3).expect("utf8 lead byte") + 1;
        let mut buffer = full[..split].to_vec();
        let mut finished = false;
        let event = pop_event(&mut buffer, "http://base", &mut finished).expect("pop");
        assert!(event.is_none());

        buffer.extend_from_slice(&full[split..]);
        let event = pop_event(&mut buffer, "http://base", &mut finished)
            .expect("pop")
            .expect("event");
        assert!(matches!(event, PackEvent::Progress { keyword, .. } if keyword == "b\u{e4}r"));
    }
}
