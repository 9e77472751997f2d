//! Syntactic checks applied to caller input before anything reaches the resolver.

use std::{fmt, sync::LazyLock};

use regex::Regex;

const UNSAFE_FILENAME_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const MAX_FILENAME_CHARS: usize = 100;
const TRUNCATED_BASE_CHARS: usize = 90;
const FALLBACK_FILENAME: &str = "download";

static WATCH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https?://(?:www\.|m\.|music\.)?youtube\.com/watch\?(?:[^#\s]*&)?v=([A-Za-z0-9_-]{11})(?:[&#]\S*)?$",
    )
    .unwrap()
});

static SHORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://youtu\.be/([A-Za-z0-9_-]{11})(?:[?#]\S*)?$").unwrap()
});

static EMBED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https?://(?:www\.)?youtube(?:-nocookie)?\.com/embed/([A-Za-z0-9_-]{11})(?:[?#]\S*)?$",
    )
    .unwrap()
});

/// A source URL that passed [`validate`]. Only constructible through [`VideoRef::parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRef {
    url: String,
    video_id: String,
}

impl VideoRef {
    pub fn parse(input: &str) -> Option<Self> {
        let url = input.trim();
        if url.is_empty() || url.len() > 2048 {
            return None;
        }

        [&*WATCH_RE, &*SHORT_RE, &*EMBED_RE]
            .iter()
            .find_map(|pattern| pattern.captures(url))
            .and_then(|captures| captures.get(1))
            .map(|id| Self {
                url: url.to_string(),
                video_id: id.as_str().to_string(),
            })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }
}

impl fmt::Display for VideoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Fails closed: anything that is not a recognized watch, short or embed link is `false`.
pub fn validate(url: &str) -> bool {
    VideoRef::parse(url).is_some()
}

/// Makes `name` safe to use as a single path component and as an attachment name.
///
/// Unsafe characters become `_`. Names longer than 100 characters keep the
/// first 90 characters of the base name plus the original extension.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|character| {
            if UNSAFE_FILENAME_CHARS.contains(&character) || character.is_control() {
                '_'
            } else {
                character
            }
        })
        .collect();

    let trimmed = replaced.trim();
    if trimmed.is_empty() {
        return FALLBACK_FILENAME.to_string();
    }

    if trimmed.chars().count() <= MAX_FILENAME_CHARS {
        return trimmed.to_string();
    }

    match trimmed.rsplit_once('.') {
        Some((base, extension))
            if !base.is_empty()
                && extension.chars().count() < MAX_FILENAME_CHARS - TRUNCATED_BASE_CHARS =>
        {
            let base: String = base.chars().take(TRUNCATED_BASE_CHARS).collect();
            format!("{}.{extension}", base.trim_end())
        }
        _ => {
            let cut: String = trimmed.chars().take(MAX_FILENAME_CHARS).collect();
            cut.trim_end().to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_recognized_link_shapes() {
        let valid = [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/watch?v=dQw4w9WgXcQ&t=42s",
            "http://m.youtube.com/watch?feature=share&v=dQw4w9WgXcQ",
            "https://music.youtube.com/watch?v=dQw4w9WgXcQ#top",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ?si=abc",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube-nocookie.com/embed/dQw4w9WgXcQ?start=3",
            "  https://youtu.be/dQw4w9WgXcQ  ",
        ];

        for url in valid {
            assert!(validate(url), "{url} should be accepted");
        }
    }

    #[test]
    fn rejects_everything_else() {
        let invalid = [
            "",
            "   ",
            "not a url",
            "https://www.youtube.com/watch?v=short",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQQ",
            "https://youtu.be/",
            "https://evil.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com.evil.com/watch?v=dQw4w9WgXcQ",
            "ftp://youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/playlist?list=PL123",
            "javascript:alert(1)//youtu.be/dQw4w9WgXcQ",
        ];

        for url in invalid {
            assert!(!validate(url), "{url:?} should be rejected");
        }
    }

    #[test]
    fn video_ref_exposes_id() {
        let video = VideoRef::parse("https://youtu.be/dQw4w9WgXcQ?t=1").unwrap();
        assert_eq!(video.video_id(), "dQw4w9WgXcQ");
        assert_eq!(video.as_str(), "https://youtu.be/dQw4w9WgXcQ?t=1");
    }

    #[test]
    fn sanitize_replaces_unsafe_chars() {
        assert_eq!(sanitize_filename("a<b>c:d\"e"), "a_b_c_d_e");
        assert_eq!(sanitize_filename("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_filename(r"x\y|z?w*.mp4"), "x_y_z_w_.mp4");
    }

    #[test]
    fn sanitize_keeps_short_names() {
        assert_eq!(sanitize_filename("My Video.mp4"), "My Video.mp4");
        assert_eq!(sanitize_filename(""), FALLBACK_FILENAME);
    }

    #[test]
    fn sanitize_truncates_and_keeps_extension() {
        let name = format!("{}.webm", "t".repeat(150));
        let sanitized = sanitize_filename(&name);
        assert_eq!(sanitized, format!("{}.webm", "t".repeat(90)));
        assert!(sanitized.chars().count() <= MAX_FILENAME_CHARS);
    }

    #[test]
    fn sanitize_truncates_names_without_extension() {
        let sanitized = sanitize_filename(&"n".repeat(130));
        assert_eq!(sanitized.chars().count(), MAX_FILENAME_CHARS);
    }

    #[test]
    fn sanitize_drops_whitespace_left_at_the_cut() {
        let name = format!("{} {}", "a".repeat(99), "b".repeat(10));
        assert_eq!(sanitize_filename(&name), "a".repeat(99));

        let name = format!("{} {}.mp4", "c".repeat(89), "d".repeat(30));
        assert_eq!(sanitize_filename(&name), format!("{}.mp4", "c".repeat(89)));
    }

    #[test]
    fn sanitize_counts_characters_not_bytes() {
        let name = format!("{}.mp4", "é".repeat(120));
        let sanitized = sanitize_filename(&name);
        assert_eq!(sanitized, format!("{}.mp4", "é".repeat(90)));
    }

    #[test]
    fn sanitize_is_idempotent() {
        let inputs = [
            "plain.mp4".to_string(),
            "a:b/c\\d.mp3".to_string(),
            format!("{}.mp4", "x".repeat(200)),
            format!("{}.{}", "y".repeat(200), "z".repeat(40)),
            format!("  {}  .wav", " ".repeat(95)),
            "\u{7}bell?.wav".to_string(),
            format!("{} {}", "a".repeat(99), "b".repeat(10)),
            format!("{} {}.mp4", "c".repeat(89), "d".repeat(30)),
            "   ".to_string(),
        ];

        for input in inputs {
            let once = sanitize_filename(&input);
            assert_eq!(sanitize_filename(&once), once, "input {input:?}");
            assert!(!once.contains(UNSAFE_FILENAME_CHARS));
            assert!(once.chars().count() <= MAX_FILENAME_CHARS);
        }
    }
}
