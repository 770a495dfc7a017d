use common::{ApiSegment, MediaInfo};
use std::path::{Path, PathBuf};

/// 文件名中不允许出现的字符
pub const ILLEGAL_FILENAME_CHARS: &[char] = &[':', '*', '?', '"', '<', '>', '|'];

/// 派生文件后缀，不视为分段
pub const DERIVED_SUFFIXES: &[&str] = &["_vod", "_chat", "_chat_mask", "_burned"];

pub fn has_illegal_chars(name: &str) -> bool {
    name.contains(ILLEGAL_FILENAME_CHARS)
}

pub fn sanitize_filename(name: &str) -> String {
    name.replace(ILLEGAL_FILENAME_CHARS, "_")
}

/// 文件名主干是否以派生后缀结尾
pub fn is_derived_artifact(file_name: &str) -> bool {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    DERIVED_SUFFIXES.iter().any(|suffix| stem.ends_with(suffix))
}

/// VOD 的单个媒体文件
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub filename: PathBuf,
    pub basename: String,
    pub filesize: u64,
    pub deleted: bool,
    pub media: Option<MediaInfo>,
}

impl Segment {
    /// 根据磁盘状态构造，文件不存在或为空时标记为已删除
    pub fn from_disk(directory: &Path, raw: &str) -> Self {
        let basename = Path::new(raw)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(raw)
            .to_string();
        let filename = directory.join(&basename);

        let filesize = std::fs::metadata(&filename).map(|m| m.len()).unwrap_or(0);

        Self {
            filename,
            basename,
            filesize,
            deleted: filesize == 0,
            media: None,
        }
    }

    pub fn exists(&self) -> bool {
        self.filename.exists()
    }

    pub fn duration(&self) -> Option<f64> {
        self.media.as_ref().map(|m| m.duration)
    }

    pub fn to_api(&self) -> ApiSegment {
        ApiSegment {
            basename: self.basename.clone(),
            filesize: self.filesize,
            deleted: self.deleted,
            duration: self.duration(),
        }
    }
}
