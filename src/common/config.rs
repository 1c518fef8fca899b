/// How much work a reader does up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadStyle {
    /// Extract codec properties (sample rate, channels, ...).
    pub properties: bool,
    /// Leave embedded pictures undecoded until they are asked for.
    pub lazy_pictures: bool,
}

impl ReadStyle {
    /// Tags only.
    pub const NONE: ReadStyle = ReadStyle {
        properties: false,
        lazy_pictures: true,
    };
}

impl Default for ReadStyle {
    fn default() -> Self {
        ReadStyle {
            properties: true,
            lazy_pictures: false,
        }
    }
}

/// Options for `save_with`. `save()` uses the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// ID3v2 major version written for new tags (3 or 4).
    pub id3v2_version: u8,
    /// Write `id3v2_version` even when the tag was read as another version.
    pub force_id3v2_version: bool,
    /// Padding added when a tag has to grow.
    pub padding: usize,
    /// Write genres as `(n)` references in ID3v2 when a number is known.
    pub use_numeric_genres: bool,
}

impl WriteOptions {
    pub fn id3v2_version(mut self, version: u8) -> Self {
        self.id3v2_version = version;
        self
    }

    pub fn padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    /// Validated target version: anything other than 3 is written as 4.
    pub fn target_id3v2_version(&self) -> u8 {
        if self.id3v2_version == 3 {
            3
        } else {
            4
        }
    }
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            id3v2_version: 4,
            force_id3v2_version: false,
            padding: 1024,
            use_numeric_genres: false,
        }
    }
}
