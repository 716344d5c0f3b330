use crate::catalog::{StreamCatalog, StreamDescriptor};
use crate::container::{Container, FALLBACK_CONTAINER};
use crate::language::LanguageFilterSet;

/// Streams picked for one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Lowest-index video stream, if any
    pub primary_video: Option<StreamDescriptor>,
    /// Every audio stream, in index order
    pub audio: Vec<StreamDescriptor>,
    /// Subtitle streams matching the language filters, in index order
    pub subtitles: Vec<StreamDescriptor>,
}

impl Selection {
    pub fn audio_indices(&self) -> Vec<u32> {
        self.audio.iter().map(|s| s.index).collect()
    }

    pub fn subtitle_indices(&self) -> Vec<u32> {
        self.subtitles.iter().map(|s| s.index).collect()
    }

    /// True only if every selected video and audio codec can be stream-copied into `target`
    pub fn container_compatible(&self, target: Container) -> bool {
        self.primary_video
            .iter()
            .all(|v| target.accepts_video(&v.codec_name))
            && self.audio.iter().all(|a| target.accepts_audio(&a.codec_name))
    }

    /// Target container when compatible, otherwise the fallback
    pub fn remux_container(&self, target: Container) -> Container {
        if self.container_compatible(target) {
            target
        } else {
            FALLBACK_CONTAINER
        }
    }

    /// Selected subtitles whose codec `container` cannot hold
    pub fn subtitle_conflicts(&self, container: Container) -> Vec<&StreamDescriptor> {
        self.subtitles
            .iter()
            .filter(|s| !container.accepts_subtitle(&s.codec_name))
            .collect()
    }
}

/// Pick the streams to act on. Pure: it never touches job state.
pub fn select_streams(catalog: &StreamCatalog, filters: &LanguageFilterSet) -> Selection {
    Selection {
        primary_video: catalog.video().next().cloned(),
        audio: catalog.audio().cloned().collect(),
        subtitles: catalog
            .subtitles()
            .filter(|s| filters.matches(s.language.as_deref()))
            .cloned()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StreamKind;

    fn catalog() -> StreamCatalog {
        StreamCatalog::new(vec![
            StreamDescriptor::new(0, StreamKind::Video, "h264"),
            StreamDescriptor::new(1, StreamKind::Audio, "aac").with_language("eng"),
            StreamDescriptor::new(2, StreamKind::Audio, "dts").with_language("por"),
            StreamDescriptor::new(3, StreamKind::Subtitle, "subrip").with_language("por"),
            StreamDescriptor::new(4, StreamKind::Subtitle, "subrip").with_language("eng"),
            StreamDescriptor::new(5, StreamKind::Subtitle, "subrip").with_language("spa"),
            StreamDescriptor::new(6, StreamKind::Subtitle, "ass"),
            StreamDescriptor::new(7, StreamKind::Video, "mjpeg"),
        ])
    }

    #[test]
    fn test_language_aliases_keep_index_order() {
        let selection = select_streams(&catalog(), &LanguageFilterSet::parse("en,pt-BR"));
        assert_eq!(selection.subtitle_indices(), vec![3, 4]);
    }

    #[test]
    fn test_wildcard_includes_untagged() {
        let selection = select_streams(&catalog(), &LanguageFilterSet::wildcard());
        assert_eq!(selection.subtitle_indices(), vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_no_filters_select_no_subtitles() {
        let selection = select_streams(&catalog(), &LanguageFilterSet::default());
        assert!(selection.subtitles.is_empty());
        assert_eq!(selection.audio_indices(), vec![1, 2]);
    }

    #[test]
    fn test_primary_video_is_lowest_index() {
        let selection = select_streams(&catalog(), &LanguageFilterSet::default());
        assert_eq!(selection.primary_video.map(|v| v.index), Some(0));
    }

    #[test]
    fn test_missing_video() {
        let catalog = StreamCatalog::new(vec![StreamDescriptor::new(0, StreamKind::Audio, "flac")]);
        let selection = select_streams(&catalog, &LanguageFilterSet::wildcard());
        assert!(selection.primary_video.is_none());
    }

    #[test]
    fn test_selection_is_deterministic() {
        let filters = LanguageFilterSet::parse("pt-BR,en");
        let first = select_streams(&catalog(), &filters);
        for _ in 0..10 {
            assert_eq!(select_streams(&catalog(), &filters), first);
        }
    }

    #[test]
    fn test_container_compatibility() {
        let selection = select_streams(&catalog(), &LanguageFilterSet::default());
        // dts is not allowed in mp4
        assert!(!selection.container_compatible(Container::Mp4));
        assert_eq!(selection.remux_container(Container::Mp4), Container::Mkv);
        assert!(selection.container_compatible(Container::Mkv));
    }

    #[test]
    fn test_subtitle_conflicts() {
        let selection = select_streams(&catalog(), &LanguageFilterSet::parse("en"));
        let conflicts = selection.subtitle_conflicts(Container::Mp4);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].index, 4);
        assert!(selection.subtitle_conflicts(Container::Mkv).is_empty());
    }
}
