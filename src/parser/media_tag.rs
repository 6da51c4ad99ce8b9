use super::{attributes::AttributeList, utils::parse_yes_no};

/// Alternative rendition declared through an `EXT-X-MEDIA` tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaGroup {
    /// `TYPE` attribute (`AUDIO`, `VIDEO`, `SUBTITLES`, `CLOSED-CAPTIONS`).
    /// Media groups are indexed by it in the `Playlist`.
    pub media_type: String,

    /// Group this rendition is part of, referenced by variants.
    pub group_id: String,

    /// Human-readable description of the rendition.
    pub name: String,

    pub language: Option<String>,

    /// Url of the Media Playlist for that rendition. `None` when the rendition
    /// is already muxed in the variant's own segments.
    pub url: Option<String>,

    pub default: bool,
    pub autoselect: bool,
    pub forced: bool,
    pub characteristics: Option<String>,
    pub channels: Option<String>,
}

impl MediaGroup {
    /// Creates a `MediaGroup` from the attribute list of an `EXT-X-MEDIA` tag.
    ///
    /// Returns `None` if the mandatory `TYPE` or `GROUP-ID` is missing.
    pub(super) fn from_attributes(attrs: &AttributeList) -> Option<Self> {
        let media_type = attrs.get("TYPE")?.to_owned();
        let group_id = attrs.get("GROUP-ID")?.to_owned();
        Some(Self {
            media_type,
            group_id,
            name: attrs.get("NAME").unwrap_or_default().to_owned(),
            language: attrs.get("LANGUAGE").map(str::to_owned),
            url: attrs.get("URI").map(str::to_owned),
            default: attrs.get("DEFAULT").map_or(false, parse_yes_no),
            autoselect: attrs.get("AUTOSELECT").map_or(false, parse_yes_no),
            forced: attrs.get("FORCED").map_or(false, parse_yes_no),
            characteristics: attrs.get("CHARACTERISTICS").map(str::to_owned),
            channels: attrs.get("CHANNELS").map(str::to_owned),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_group_from_attributes() {
        let attrs = AttributeList::parse(
            r#"TYPE=AUDIO,GROUP-ID="aac",NAME="English",LANGUAGE="en",DEFAULT=YES,AUTOSELECT=YES,URI="audio/en.m3u8",CHANNELS="2""#,
        );
        let group = MediaGroup::from_attributes(&attrs).unwrap();
        assert_eq!(group.media_type, "AUDIO");
        assert_eq!(group.group_id, "aac");
        assert_eq!(group.name, "English");
        assert_eq!(group.language.as_deref(), Some("en"));
        assert_eq!(group.url.as_deref(), Some("audio/en.m3u8"));
        assert!(group.default);
        assert!(group.autoselect);
        assert!(!group.forced);
        assert_eq!(group.channels.as_deref(), Some("2"));
    }

    #[test]
    fn test_missing_mandatory_attributes() {
        let attrs = AttributeList::parse(r#"GROUP-ID="aac",NAME="English""#);
        assert!(MediaGroup::from_attributes(&attrs).is_none());
        let attrs = AttributeList::parse(r#"TYPE=AUDIO,NAME="English""#);
        assert!(MediaGroup::from_attributes(&attrs).is_none());
    }
}
