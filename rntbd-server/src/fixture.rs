//! Canned document served for document reads.

use crate::config::FixtureConfig;
use crate::error::ServerError;
use bytes::Bytes;
use std::path::Path;

/// The built-in document, a JSON:API sample.
pub const DEFAULT_DOCUMENT: &str = r#"{
  "data": [{
    "type": "articles",
    "id": "1",
    "attributes": {
      "title": "JSON:API paints my bikeshed!",
      "body": "The shortest article. Ever.",
      "created": "2015-05-22T14:56:29.000Z",
      "updated": "2015-05-22T14:56:28.000Z"
    },
    "relationships": {
      "author": {
        "data": {"id": "42", "type": "people"}
      }
    }
  }],
  "included": [
    {
      "type": "people",
      "id": "42",
      "attributes": {
        "name": "John",
        "age": 80,
        "gender": "male"
      }
    }
  ]
}"#;

/// Document payload, shared cheaply between connections.
#[derive(Debug, Clone)]
pub struct DocumentFixture {
    body: Bytes,
}

impl DocumentFixture {
    pub fn builtin() -> Self {
        Self {
            body: Bytes::from_static(DEFAULT_DOCUMENT.as_bytes()),
        }
    }

    /// Loads a document from disk. The file must hold valid JSON; its
    /// bytes are served unchanged.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let path = path.as_ref();
        let content = std::fs::read(path).map_err(|e| {
            ServerError::Fixture(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_slice::<serde_json::Value>(&content).map_err(|e| {
            ServerError::Fixture(format!("{} is not valid JSON: {}", path.display(), e))
        })?;
        Ok(Self {
            body: Bytes::from(content),
        })
    }

    /// Loads the configured document and checks that it fits in a payload
    /// block of at most `max_size` bytes.
    pub fn from_config(config: &FixtureConfig, max_size: u32) -> Result<Self, ServerError> {
        let fixture = match &config.document_path {
            Some(path) => Self::from_file(path)?,
            None => Self::builtin(),
        };
        fixture.ensure_fits(max_size)?;
        Ok(fixture)
    }

    /// Fails if the document does not fit in a `max_size` payload block.
    pub fn ensure_fits(&self, max_size: u32) -> Result<(), ServerError> {
        if self.len() > max_size as usize {
            return Err(ServerError::Fixture(format!(
                "document is {} bytes, payload limit is {}",
                self.len(),
                max_size
            )));
        }
        Ok(())
    }

    pub fn body(&self) -> Bytes {
        self.body.clone()
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

impl Default for DocumentFixture {
    fn default() -> Self {
        Self::builtin()
    }
}
