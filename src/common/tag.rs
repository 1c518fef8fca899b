/// Tag families the library reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagType {
    Id3v1,
    Id3v2,
    Ape,
    Xiph,
    Mp4,
    RiffInfo,
    MovieId,
    DivX,
    Asf,
    Matroska,
    Png,
    Tiff,
}

/// The uniform field surface every concrete tag offers.
///
/// Setters take an empty string (or zero) to remove the field.
pub trait Tag {
    fn tag_type(&self) -> TagType;

    fn title(&self) -> Option<String>;
    fn artist(&self) -> Option<String>;
    fn album(&self) -> Option<String>;
    fn comment(&self) -> Option<String>;
    fn genre(&self) -> Option<String>;
    fn year(&self) -> Option<u32>;
    fn track(&self) -> Option<u32>;

    fn set_title(&mut self, value: &str);
    fn set_artist(&mut self, value: &str);
    fn set_album(&mut self, value: &str);
    fn set_comment(&mut self, value: &str);
    fn set_genre(&mut self, value: &str);
    fn set_year(&mut self, value: u32);
    fn set_track(&mut self, value: u32);

    fn is_empty(&self) -> bool;
    fn clear(&mut self);
}

/// Several tags read as one. Getters answer from the first tag that has a
/// value; setters write through to all of them.
pub struct CombinedTag<'a> {
    tags: Vec<&'a mut dyn Tag>,
}

impl<'a> CombinedTag<'a> {
    /// `tags` in priority order, highest first.
    pub fn new(tags: Vec<&'a mut dyn Tag>) -> Self {
        CombinedTag { tags }
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.iter().all(|t| t.is_empty())
    }

    fn first<T>(&self, get: impl Fn(&(dyn Tag + 'a)) -> Option<T>) -> Option<T> {
        self.tags.iter().find_map(|t| get(&**t))
    }

    fn each(&mut self, mut set: impl FnMut(&mut (dyn Tag + 'a))) {
        for tag in self.tags.iter_mut() {
            set(&mut **tag);
        }
    }

    pub fn title(&self) -> Option<String> {
        self.first(|t| t.title().filter(|s| !s.is_empty()))
    }

    pub fn artist(&self) -> Option<String> {
        self.first(|t| t.artist().filter(|s| !s.is_empty()))
    }

    pub fn album(&self) -> Option<String> {
        self.first(|t| t.album().filter(|s| !s.is_empty()))
    }

    pub fn comment(&self) -> Option<String> {
        self.first(|t| t.comment().filter(|s| !s.is_empty()))
    }

    pub fn genre(&self) -> Option<String> {
        self.first(|t| t.genre().filter(|s| !s.is_empty()))
    }

    pub fn year(&self) -> Option<u32> {
        self.first(|t| t.year().filter(|&y| y != 0))
    }

    pub fn track(&self) -> Option<u32> {
        self.first(|t| t.track().filter(|&n| n != 0))
    }

    pub fn set_title(&mut self, value: &str) {
        self.each(|t| t.set_title(value));
    }

    pub fn set_artist(&mut self, value: &str) {
        self.each(|t| t.set_artist(value));
    }

    pub fn set_album(&mut self, value: &str) {
        self.each(|t| t.set_album(value));
    }

    pub fn set_comment(&mut self, value: &str) {
        self.each(|t| t.set_comment(value));
    }

    pub fn set_genre(&mut self, value: &str) {
        self.each(|t| t.set_genre(value));
    }

    pub fn set_year(&mut self, value: u32) {
        self.each(|t| t.set_year(value));
    }

    pub fn set_track(&mut self, value: u32) {
        self.each(|t| t.set_track(value));
    }

    pub fn clear(&mut self) {
        self.each(|t| t.clear());
    }
}
