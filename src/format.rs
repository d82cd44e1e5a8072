//! Audio container detection for local imports.

use std::path::Path;

/// Containers accepted for local import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mp3,
    Wav,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
        }
    }

    /// Format named by the file extension, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "mp3" => Some(AudioFormat::Mp3),
            "wav" => Some(AudioFormat::Wav),
            _ => None,
        }
    }

    /// Format recognized from magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
            return Some(AudioFormat::Wav);
        }
        if bytes.starts_with(b"ID3") {
            return Some(AudioFormat::Mp3);
        }
        // MPEG audio frame sync: 11 set bits.
        if bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0 {
            return Some(AudioFormat::Mp3);
        }
        None
    }

    /// Format of an upload. A file extension, when present, decides; only
    /// extensionless names fall back to the content.
    pub fn detect(name: &str, bytes: &[u8]) -> Option<Self> {
        match Path::new(name).extension() {
            Some(_) => Self::from_name(name),
            None => Self::sniff(bytes),
        }
    }
}

/// Display title for an imported file: its name without the extension.
pub fn title_from_name(name: &str) -> String {
    let file_name = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name);
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => file_name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_case_insensitive() {
        assert_eq!(AudioFormat::from_name("Song.MP3"), Some(AudioFormat::Mp3));
        assert_eq!(AudioFormat::from_name("take.Wav"), Some(AudioFormat::Wav));
        assert_eq!(AudioFormat::from_name("notes.txt"), None);
        assert_eq!(AudioFormat::from_name("noext"), None);
    }

    #[test]
    fn sniffs_magic_bytes() {
        assert_eq!(AudioFormat::sniff(b"ID3\x04\x00"), Some(AudioFormat::Mp3));
        assert_eq!(AudioFormat::sniff(&[0xFF, 0xFB, 0x90, 0x00]), Some(AudioFormat::Mp3));
        assert_eq!(
            AudioFormat::sniff(b"RIFF\x24\x00\x00\x00WAVEfmt "),
            Some(AudioFormat::Wav)
        );
        assert_eq!(AudioFormat::sniff(b"%PDF-1.7"), None);
        assert_eq!(AudioFormat::sniff(b""), None);
    }

    #[test]
    fn detect_falls_back_to_content() {
        assert_eq!(AudioFormat::detect("upload", b"ID3...."), Some(AudioFormat::Mp3));
        assert_eq!(AudioFormat::detect("cover.jpg", b"\xFF\xD8\xFF\xE0"), None);
        assert_eq!(AudioFormat::detect("notes.txt", b"ID3...."), None);
    }

    #[test]
    fn title_strips_extension_and_directories() {
        assert_eq!(title_from_name("Midnight Drive.mp3"), "Midnight Drive");
        assert_eq!(title_from_name("/tmp/a.b.wav"), "a.b");
        assert_eq!(title_from_name(".hidden"), ".hidden");
        assert_eq!(title_from_name("plain"), "plain");
    }
}
