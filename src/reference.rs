/// A value found in an image column, classified by where its bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    RemoteUrl(String),
    LocalPath(String),
    Opaque(String),
}

impl ImageReference {
    /// Remote URLs win over every path rule; path rules are tried in order.
    pub fn classify(value: &str) -> Self {
        let value = value.trim();
        if is_remote_url(value) {
            return ImageReference::RemoteUrl(value.to_string());
        }
        if is_local_path(value) {
            return ImageReference::LocalPath(value.to_string());
        }
        ImageReference::Opaque(value.to_string())
    }

    /// Splits a comma-separated gallery cell; blank entries are dropped.
    pub fn classify_list(value: &str) -> Vec<Self> {
        value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(Self::classify)
            .collect()
    }

    pub fn as_str(&self) -> &str {
        match self {
            ImageReference::RemoteUrl(value)
            | ImageReference::LocalPath(value)
            | ImageReference::Opaque(value) => value,
        }
    }

    /// Last path segment, accepting both `/` and `\` separators.
    pub fn file_name(&self) -> &str {
        let value = self.as_str();
        value
            .rsplit(['/', '\\'])
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or(value)
    }
}

fn is_remote_url(value: &str) -> bool {
    reqwest::Url::parse(value)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
        .unwrap_or(false)
}

fn is_local_path(value: &str) -> bool {
    value.starts_with("./")
        || value.starts_with("../")
        || is_windows_drive_path(value)
        || is_posix_absolute(value)
        || value.starts_with("images/")
}

fn is_windows_drive_path(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'\\'
}

fn is_posix_absolute(value: &str) -> bool {
    let mut chars = value.chars();
    chars.next() == Some('/') && chars.next().is_some_and(|next| next != '/')
}
