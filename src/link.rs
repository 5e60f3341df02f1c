#![forbid(unsafe_code)]

//! Share-link parsing for Google Drive.
//!
//! Drive hands out a handful of link flavours. Only two of them carry the file
//! id in a place we can read without talking to Google, so those are the only
//! shapes accepted here. Anything else is rejected before a request is made.

use std::fmt;
use thiserror::Error;

pub const DRIVE_DOMAIN: &str = "drive.google.com";
pub const DEFAULT_DRIVE_BASE: &str = "https://drive.google.com";

const FILE_PATH_MARKER: &str = "/file/d/";
const UC_QUERY_MARKER: &str = "uc?id=";

/// Opaque Drive file identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileId(String);

impl FileId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Link layouts we know how to pull an id out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkShape {
    /// `https://drive.google.com/file/d/<id>/view?usp=sharing`
    FilePath,
    /// `https://drive.google.com/uc?id=<id>&export=download`
    UcQuery,
}

impl LinkShape {
    const ALL: [LinkShape; 2] = [LinkShape::FilePath, LinkShape::UcQuery];

    fn marker(self) -> &'static str {
        match self {
            LinkShape::FilePath => FILE_PATH_MARKER,
            LinkShape::UcQuery => UC_QUERY_MARKER,
        }
    }

    fn terminator(self) -> char {
        match self {
            LinkShape::FilePath => '/',
            LinkShape::UcQuery => '&',
        }
    }

    /// Returns the id embedded in `link` when it follows this shape.
    fn extract(self, link: &str) -> Option<&str> {
        let (_, rest) = link.split_once(self.marker())?;
        let id = rest.split(self.terminator()).next().unwrap_or(rest);
        (!id.is_empty()).then_some(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("not a Google Drive link")]
    NotDriveLink,
    #[error("Invalid Google Drive link format.")]
    UnrecognizedFormat,
}

/// Extracts the file id from a share link.
pub fn resolve_file_id(link: &str) -> Result<(FileId, LinkShape), LinkError> {
    if !link.contains(DRIVE_DOMAIN) {
        return Err(LinkError::NotDriveLink);
    }
    LinkShape::ALL
        .into_iter()
        .find_map(|shape| {
            shape
                .extract(link)
                .map(|id| (FileId(id.to_string()), shape))
        })
        .ok_or(LinkError::UnrecognizedFormat)
}

/// Direct-download URL on the public Drive host.
pub fn generate_download_link(id: &FileId) -> String {
    LinkResolver::default().download_url(id)
}

/// Resolves share links and builds download URLs against a configurable base.
#[derive(Debug, Clone)]
pub struct LinkResolver {
    base: String,
}

impl Default for LinkResolver {
    fn default() -> Self {
        Self::new(DEFAULT_DRIVE_BASE)
    }
}

impl LinkResolver {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        let base = base.trim_end_matches('/').to_string();
        Self { base }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn resolve(&self, link: &str) -> Result<FileId, LinkError> {
        resolve_file_id(link.trim()).map(|(id, _)| id)
    }

    pub fn download_url(&self, id: &FileId) -> String {
        format!("{}/uc?id={}&export=download", self.base, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_path_links_yield_id() {
        let (id, shape) =
            resolve_file_id("https://drive.google.com/file/d/ABC123/view?usp=sharing").unwrap();
        assert_eq!(id.as_str(), "ABC123");
        assert_eq!(shape, LinkShape::FilePath);
    }

    #[test]
    fn file_path_without_trailing_segment() {
        let (id, _) = resolve_file_id("https://drive.google.com/file/d/XYZ").unwrap();
        assert_eq!(id.as_str(), "XYZ");
    }

    #[test]
    fn uc_links_stop_at_ampersand_or_end() {
        let (id, shape) =
            resolve_file_id("https://drive.google.com/uc?id=Q-9_z&export=download").unwrap();
        assert_eq!(id.as_str(), "Q-9_z");
        assert_eq!(shape, LinkShape::UcQuery);

        let (id, _) = resolve_file_id("https://drive.google.com/uc?id=tail").unwrap();
        assert_eq!(id.as_str(), "tail");
    }

    #[test]
    fn file_path_takes_precedence_over_query() {
        let (id, shape) =
            resolve_file_id("https://drive.google.com/file/d/first/view?x=uc?id=second").unwrap();
        assert_eq!(id.as_str(), "first");
        assert_eq!(shape, LinkShape::FilePath);
    }

    #[test]
    fn links_without_domain_are_rejected() {
        for link in [
            "not-a-drive-link",
            "",
            "https://example.com/file/d/ABC/view",
            "https://docs.google.com/uc?id=ABC",
        ] {
            assert_eq!(resolve_file_id(link), Err(LinkError::NotDriveLink), "{link}");
        }
    }

    #[test]
    fn unknown_drive_shapes_are_rejected() {
        assert_eq!(
            resolve_file_id("https://drive.google.com/drive/folders/abc"),
            Err(LinkError::UnrecognizedFormat)
        );
        assert_eq!(
            resolve_file_id("https://drive.google.com/file/d//view"),
            Err(LinkError::UnrecognizedFormat)
        );
        assert_eq!(
            resolve_file_id("https://drive.google.com/uc?id=&export=download"),
            Err(LinkError::UnrecognizedFormat)
        );
    }

    #[test]
    fn download_link_is_fixed_template() {
        let id = FileId("ABC123".into());
        let first = generate_download_link(&id);
        assert_eq!(
            first,
            "https://drive.google.com/uc?id=ABC123&export=download"
        );
        assert_eq!(first, generate_download_link(&id));
    }

    #[test]
    fn resolver_uses_custom_base_and_trims_input() {
        let resolver = LinkResolver::new("http://127.0.0.1:9000/");
        let id = resolver
            .resolve("  https://drive.google.com/file/d/ABC123/view \n")
            .unwrap();
        assert_eq!(
            resolver.download_url(&id),
            "http://127.0.0.1:9000/uc?id=ABC123&export=download"
        );
    }
}
