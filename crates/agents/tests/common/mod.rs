//! Common test utilities
#![allow(dead_code)]

use base64::Engine;
use flowgraph_agents::{ExtractionOracle, OracleMessage, Result};
use flowgraph_db::{init_memory, Repository};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

/// Create a test repository with in-memory database
pub async fn create_test_repo() -> Repository {
    let db = init_memory().await.expect("Failed to create test database");
    Repository::new(db)
}

type Responder = Box<dyn Fn(&[OracleMessage]) -> Result<Option<String>> + Send + Sync>;

/// Oracle double that answers from a script and records every request
pub struct ScriptedOracle {
    responder: Responder,
    requests: Mutex<Vec<Vec<OracleMessage>>>,
}

impl ScriptedOracle {
    /// Answer each request with `responder`
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&[OracleMessage]) -> Result<Option<String>> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Answer requests in order from `replies`; `None` once exhausted
    pub fn replies(replies: Vec<Option<&str>>) -> Arc<Self> {
        let queue: Mutex<VecDeque<Option<String>>> =
            Mutex::new(replies.into_iter().map(|r| r.map(String::from)).collect());
        Self::new(move |_| Ok(queue.lock().unwrap().pop_front().flatten()))
    }

    pub fn requests(&self) -> Vec<Vec<OracleMessage>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl ExtractionOracle for ScriptedOracle {
    async fn complete(&self, messages: Vec<OracleMessage>) -> Result<Option<String>> {
        let reply = (self.responder)(&messages);
        self.requests.lock().unwrap().push(messages);
        reply
    }
}

/// Text of the first (system) message
pub fn system_prompt(messages: &[OracleMessage]) -> String {
    messages.first().map(|m| m.text_content()).unwrap_or_default()
}

/// Base64 PNG: white canvas with a black rectangle outline
pub fn flowchart_png(width: u32, height: u32) -> String {
    let mut img = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    let (x1, y1, x2, y2) = (width / 4, height / 4, width * 3 / 4, height * 3 / 4);
    for x in x1..=x2 {
        for y in [y1, y1 + 1, y2 - 1, y2] {
            img.put_pixel(x, y, Rgb([0, 0, 0]));
        }
    }
    for y in y1..=y2 {
        for x in [x1, x1 + 1, x2 - 1, x2] {
            img.put_pixel(x, y, Rgb([0, 0, 0]));
        }
    }

    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .expect("encode png");
    base64::engine::general_purpose::STANDARD.encode(buf.into_inner())
}
