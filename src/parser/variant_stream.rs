use super::{
    attributes::AttributeList,
    utils::{parse_resolution, Resolution},
};

/// Stucture representing the HLS concept of a "variant stream": one rendition
/// of the content listed in a master playlist.
#[derive(Clone, Debug, PartialEq)]
pub struct Variant {
    /// Url of the Media Playlist of this variant.
    ///
    /// As written in the master playlist until it is loaded through the
    /// `ContentLoader`, which resolves it to an absolute URL.
    pub url: String,

    /// The value represents the peak segment bit rate of the Variant Stream,
    /// in bits per second.
    ///
    /// `0` if the attribute was missing or malformed.
    pub bandwidth: u64,

    /// The value represents the average segment bit rate of the Variant Stream.
    pub average_bandwidth: Option<u64>,

    /// Comma-separated list of formats, as declared.
    pub codecs: Option<String>,

    /// Optimal pixel resolution at which to display all the video in the
    /// Variant Stream.
    pub resolution: Option<Resolution>,

    /// Maximum frame rate for all the video in the Variant Stream.
    pub frame_rate: Option<f64>,

    /// `GROUP-ID` of the audio media group associated to this variant.
    pub audio: Option<String>,

    /// `GROUP-ID` of the video media group associated to this variant.
    pub video: Option<String>,

    /// `GROUP-ID` of the subtitles media group associated to this variant.
    pub subtitles: Option<String>,

    /// `GROUP-ID` of the closed-captions media group associated to this
    /// variant, `None` also when explicitly set to `NONE`.
    pub closed_captions: Option<String>,
}

impl Variant {
    /// Creates a `Variant` from the attribute list of an `EXT-X-STREAM-INF`
    /// tag. Its `url` stays empty until the following URI line is read.
    pub(super) fn from_attributes(attrs: &AttributeList) -> Self {
        let bandwidth = match attrs.get("BANDWIDTH").map(str::parse::<u64>) {
            Some(Ok(b)) => b,
            _ => {
                tracing::warn!("Parser: Missing or unparsable BANDWIDTH, defaulting to 0");
                0
            }
        };
        let closed_captions = attrs
            .get("CLOSED-CAPTIONS")
            .filter(|cc| *cc != "NONE")
            .map(str::to_owned);
        Self {
            url: String::new(),
            bandwidth,
            average_bandwidth: attrs
                .get("AVERAGE-BANDWIDTH")
                .and_then(|b| b.parse().ok()),
            codecs: attrs.get("CODECS").map(str::to_owned),
            resolution: attrs.get("RESOLUTION").and_then(parse_resolution),
            frame_rate: attrs.get("FRAME-RATE").and_then(|f| f.parse().ok()),
            audio: attrs.get("AUDIO").map(str::to_owned),
            video: attrs.get("VIDEO").map(str::to_owned),
            subtitles: attrs.get("SUBTITLES").map(str::to_owned),
            closed_captions,
        }
    }

    /// List of codecs declared for this variant.
    pub fn codec_list(&self) -> Vec<&str> {
        self.codecs
            .as_deref()
            .map(|c| c.split(',').map(str::trim).collect())
            .unwrap_or_default()
    }
}
