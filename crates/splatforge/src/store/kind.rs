use std::fmt;
use std::path::Path;

/// The two object kinds the bucket accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Raw uploaded clip.
    Video,
    /// Servable point artifact.
    Splat,
}

/// Content type for anything that is not a recognized kind.
pub const GENERIC_CONTENT_TYPE: &str = "application/octet-stream";

impl ArtifactKind {
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Video => "mp4",
            ArtifactKind::Splat => "splat",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ArtifactKind::Video => "video/mp4",
            ArtifactKind::Splat => GENERIC_CONTENT_TYPE,
        }
    }

    /// Recognizes a kind from a key or filename's extension (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?;
        if ext.eq_ignore_ascii_case("mp4") {
            Some(ArtifactKind::Video)
        } else if ext.eq_ignore_ascii_case("splat") {
            Some(ArtifactKind::Splat)
        } else {
            None
        }
    }

    /// Object key for a video record: `video<id>.mp4`.
    pub fn video_key(video_id: i64) -> String {
        format!("video{}.{}", video_id, ArtifactKind::Video.extension())
    }

    /// Object key for a finished work: `work<id>.splat`.
    pub fn work_key(work_id: i64) -> String {
        format!("work{}.{}", work_id, ArtifactKind::Splat.extension())
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Content type derived purely from the extension.
pub fn content_type_for(name: &str) -> &'static str {
    ArtifactKind::from_name(name)
        .map(ArtifactKind::content_type)
        .unwrap_or(GENERIC_CONTENT_TYPE)
}
