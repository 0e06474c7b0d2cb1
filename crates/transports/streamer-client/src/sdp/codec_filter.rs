//! Codec preference filter for SDP offers
//!
//! The filter works on raw SDP text. Each `m=` line starts a media section
//! that runs until the next `m=` line; the lines before the first `m=` form
//! the session-level section and are never touched. For every section of the
//! preferred media kind, payload types whose `rtpmap` encoding name contains
//! the preferred codec are kept and everything else is removed from the
//! `m=` line and from the payload-scoped attributes (`rtpmap`, `fmtp`,
//! `rtcp-fb`). A section with no matching payload type is left as it is.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use tracing::debug;

/// Attribute prefixes whose value starts with a payload type
const PAYLOAD_ATTRIBUTES: [&str; 3] = ["a=rtpmap:", "a=fmtp:", "a=rtcp-fb:"];

/// Media kind of an SDP media section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// `m=audio`
    Audio,
    /// `m=video`
    Video,
}

impl MediaKind {
    /// SDP token for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    /// Parse the media token of an `m=` line (case-sensitive)
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "audio" => Some(MediaKind::Audio),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Preferred codec for one media kind, e.g. `video/H264`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecPreference {
    kind: MediaKind,
    codec: String,
}

impl CodecPreference {
    /// Create a preference from its parts
    ///
    /// Returns `None` when the codec token is empty.
    pub fn new(kind: MediaKind, codec: &str) -> Option<Self> {
        let codec = codec.trim().to_ascii_lowercase();
        if codec.is_empty() {
            return None;
        }
        Some(Self { kind, codec })
    }

    /// Parse a `"<kind>/<codec>"` preference string
    ///
    /// Without a `/` the whole string is the codec token and the kind is
    /// video. When the part before the `/` is not `audio` or `video`, that
    /// part is taken as the codec token for video. Returns `None` when no
    /// usable codec token remains.
    pub fn parse(preference: &str) -> Option<Self> {
        let lowered = preference.trim().to_ascii_lowercase();

        match lowered.split_once('/') {
            None => Self::new(MediaKind::Video, &lowered),
            Some((head, tail)) => match MediaKind::from_token(head) {
                Some(kind) => {
                    let codec = tail.split('/').next().unwrap_or_default();
                    Self::new(kind, codec)
                }
                None => Self::new(MediaKind::Video, head),
            },
        }
    }

    /// Media kind the preference applies to
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Lowercased codec token matched against `rtpmap` encoding names
    pub fn codec(&self) -> &str {
        &self.codec
    }

    fn matches_encoding(&self, encoding: &str) -> bool {
        let name = encoding.split('/').next().unwrap_or(encoding);
        name.to_ascii_lowercase().contains(&self.codec)
    }
}

impl fmt::Display for CodecPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.codec)
    }
}

/// Narrow the sections of the preferred kind down to the preferred codec
///
/// Lines keep their original terminators, so sections that are not rewritten
/// come back byte-identical.
pub fn filter_preferred_codec(sdp: &str, preference: &CodecPreference) -> String {
    if sdp.is_empty() {
        return String::new();
    }

    let lines: Vec<&str> = sdp.split('\n').collect();
    let mut output: Vec<Cow<'_, str>> = Vec::with_capacity(lines.len());

    for section in split_sections(&lines) {
        let rewritten = match section_kind(section) {
            Some(kind) if kind == preference.kind => rewrite_section(section, preference),
            _ => None,
        };

        match rewritten {
            Some(lines) => output.extend(lines),
            None => output.extend(section.iter().map(|line| Cow::Borrowed(*line))),
        }
    }

    output.join("\n")
}

/// Split lines into the session-level section followed by one slice per `m=` line
fn split_sections<'a, 'b>(lines: &'b [&'a str]) -> Vec<&'b [&'a str]> {
    let mut sections = Vec::new();
    let mut start = 0;

    for (index, line) in lines.iter().enumerate() {
        if index > start && line.starts_with("m=") {
            sections.push(&lines[start..index]);
            start = index;
        }
    }
    if start < lines.len() {
        sections.push(&lines[start..]);
    }

    sections
}

fn section_kind(section: &[&str]) -> Option<MediaKind> {
    let header = content(section.first()?).strip_prefix("m=")?;
    let token = header.split(' ').next()?;
    MediaKind::from_token(token)
}

fn rewrite_section<'a>(
    section: &[&'a str],
    preference: &CodecPreference,
) -> Option<Vec<Cow<'a, str>>> {
    let preferred: Vec<&str> = section
        .iter()
        .filter_map(|line| content(line).strip_prefix("a=rtpmap:"))
        .filter_map(|value| {
            let (payload, encoding) = value.split_once(' ')?;
            preference.matches_encoding(encoding).then_some(payload)
        })
        .collect();

    if preferred.is_empty() {
        debug!(preference = %preference, "No payload type matches codec preference, section unchanged");
        return None;
    }

    let m_line = section[0];
    let tokens: Vec<&str> = content(m_line).split(' ').collect();
    if tokens.len() < 3 {
        return None;
    }

    let mut header: Vec<&str> = tokens[..3].to_vec();
    header.extend(preferred.iter().copied());
    let mut new_m_line = header.join(" ");
    if m_line.ends_with('\r') {
        new_m_line.push('\r');
    }

    debug!(
        preference = %preference,
        payload_types = ?preferred,
        "Restricted media section to preferred payload types"
    );

    let mut rewritten = Vec::with_capacity(section.len());
    rewritten.push(Cow::Owned(new_m_line));
    rewritten.extend(
        section[1..]
            .iter()
            .filter(|line| match payload_of(content(line)) {
                Some(payload) => preferred.contains(&payload),
                None => true,
            })
            .map(|line| Cow::Borrowed(*line)),
    );

    Some(rewritten)
}

/// Payload type of a payload-scoped attribute line
fn payload_of(line: &str) -> Option<&str> {
    PAYLOAD_ATTRIBUTES
        .iter()
        .find_map(|prefix| line.strip_prefix(prefix))
        .map(|value| value.split(' ').next().unwrap_or(value))
}

fn content(line: &str) -> &str {
    line.strip_suffix('\r').unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0 1\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111 0 8\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:0\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=fmtp:111 minptime=10;useinbandfec=1\r\n\
a=rtcp-fb:111 transport-cc\r\n\
a=rtpmap:0 PCMU/8000\r\n\
a=rtpmap:8 PCMA/8000\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 97 98 99\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:1\r\n\
a=recvonly\r\n\
a=rtpmap:96 H264/90000\r\n\
a=rtcp-fb:96 nack\r\n\
a=rtcp-fb:96 nack pli\r\n\
a=fmtp:96 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f\r\n\
a=rtpmap:97 VP8/90000\r\n\
a=rtcp-fb:97 nack\r\n\
a=rtpmap:98 h264/90000\r\n\
a=fmtp:98 packetization-mode=0\r\n\
a=rtpmap:99 rtx/90000\r\n\
a=fmtp:99 apt=96\r\n";

    fn section_of<'a>(sdp: &'a str, kind: &str) -> Vec<&'a str> {
        let marker = format!("m={}", kind);
        let lines: Vec<&str> = sdp.split("\r\n").collect();
        let start = lines.iter().position(|l| l.starts_with(&marker)).unwrap();
        let end = lines[start + 1..]
            .iter()
            .position(|l| l.starts_with("m="))
            .map(|p| start + 1 + p)
            .unwrap_or(lines.len());
        lines[start..end].to_vec()
    }

    #[test]
    fn test_parse_preference() {
        let pref = CodecPreference::parse("video/H264").unwrap();
        assert_eq!(pref.kind(), MediaKind::Video);
        assert_eq!(pref.codec(), "h264");

        let pref = CodecPreference::parse("audio/OPUS").unwrap();
        assert_eq!(pref.kind(), MediaKind::Audio);
        assert_eq!(pref.codec(), "opus");
        assert_eq!(pref.to_string(), "audio/opus");
    }

    #[test]
    fn test_parse_preference_defaults_to_video() {
        let pref = CodecPreference::parse("VP8").unwrap();
        assert_eq!(pref.kind(), MediaKind::Video);
        assert_eq!(pref.codec(), "vp8");

        let pref = CodecPreference::parse("h264/90000").unwrap();
        assert_eq!(pref.kind(), MediaKind::Video);
        assert_eq!(pref.codec(), "h264");
    }

    #[test]
    fn test_parse_preference_rejects_empty_codec() {
        assert!(CodecPreference::parse("").is_none());
        assert!(CodecPreference::parse("video/").is_none());
        assert!(CodecPreference::parse("  ").is_none());
    }

    #[test]
    fn test_h264_preference_keeps_only_h264_payloads() {
        let pref = CodecPreference::parse("video/H264").unwrap();
        let filtered = filter_preferred_codec(OFFER, &pref);
        let video = section_of(&filtered, "video");

        assert_eq!(video[0], "m=video 9 UDP/TLS/RTP/SAVPF 96 98");
        assert!(video.contains(&"a=rtpmap:96 H264/90000"));
        assert!(video.contains(&"a=rtpmap:98 h264/90000"));
        assert!(video.contains(&"a=fmtp:98 packetization-mode=0"));
        assert!(video.contains(&"a=rtcp-fb:96 nack pli"));
        assert!(!video.iter().any(|l| l.starts_with("a=rtpmap:97")));
        assert!(!video.iter().any(|l| l.starts_with("a=rtcp-fb:97")));
        assert!(!video.iter().any(|l| l.starts_with("a=rtpmap:99")));
        assert!(!video.iter().any(|l| l.starts_with("a=fmtp:99")));

        // Non payload-scoped attributes survive
        assert!(video.contains(&"a=mid:1"));
        assert!(video.contains(&"a=recvonly"));
    }

    #[test]
    fn test_other_kind_sections_are_byte_identical() {
        let pref = CodecPreference::parse("video/H264").unwrap();
        let filtered = filter_preferred_codec(OFFER, &pref);

        assert_eq!(section_of(&filtered, "audio"), section_of(OFFER, "audio"));
        assert!(filtered.starts_with("v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=group:BUNDLE 0 1\r\nm=audio"));
        assert!(filtered.ends_with("a=fmtp:98 packetization-mode=0\r\n"));
    }

    #[test]
    fn test_no_match_is_identity() {
        let pref = CodecPreference::parse("video/AV1").unwrap();
        assert_eq!(filter_preferred_codec(OFFER, &pref), OFFER);

        let pref = CodecPreference::parse("audio/G722").unwrap();
        assert_eq!(filter_preferred_codec(OFFER, &pref), OFFER);
    }

    #[test]
    fn test_spec_scenario_two_codecs() {
        let sdp = "v=0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96 97\r\na=rtpmap:96 H264/90000\r\na=rtpmap:97 VP8/90000\r\n";
        let pref = CodecPreference::parse("video/H264").unwrap();

        assert_eq!(
            filter_preferred_codec(sdp, &pref),
            "v=0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=rtpmap:96 H264/90000\r\n"
        );
    }

    #[test]
    fn test_audio_preference_leaves_video_alone() {
        let pref = CodecPreference::parse("audio/pcmu").unwrap();
        let filtered = filter_preferred_codec(OFFER, &pref);

        let audio = section_of(&filtered, "audio");
        assert_eq!(audio[0], "m=audio 9 UDP/TLS/RTP/SAVPF 0");
        assert!(audio.contains(&"a=rtpmap:0 PCMU/8000"));
        assert!(!audio.iter().any(|l| l.starts_with("a=fmtp:111")));
        assert!(!audio.iter().any(|l| l.starts_with("a=rtcp-fb:111")));

        assert_eq!(section_of(&filtered, "video"), section_of(OFFER, "video"));
    }

    #[test]
    fn test_payload_types_compare_as_whole_tokens() {
        let sdp = "m=video 9 RTP/AVP 9 96\na=rtpmap:9 H264/90000\na=rtpmap:96 VP8/90000\na=fmtp:96 x=1\n";
        let pref = CodecPreference::parse("h264").unwrap();

        assert_eq!(
            filter_preferred_codec(sdp, &pref),
            "m=video 9 RTP/AVP 9\na=rtpmap:9 H264/90000\n"
        );
    }

    #[test]
    fn test_codec_name_not_clock_rate_is_matched() {
        // "9" occurs in the clock rate of every video codec
        let sdp = "m=video 9 RTP/AVP 96 97\na=rtpmap:96 H264/90000\na=rtpmap:97 VP8/90000\n";
        let pref = CodecPreference::new(MediaKind::Video, "9").unwrap();

        assert_eq!(filter_preferred_codec(sdp, &pref), sdp);
    }

    #[test]
    fn test_wildcard_feedback_is_dropped_from_rewritten_section() {
        let sdp = "m=video 9 RTP/AVP 96 97\na=rtpmap:96 H264/90000\na=rtpmap:97 VP8/90000\na=rtcp-fb:* ccm fir\n";
        let pref = CodecPreference::parse("video/h264").unwrap();

        assert_eq!(
            filter_preferred_codec(sdp, &pref),
            "m=video 9 RTP/AVP 96\na=rtpmap:96 H264/90000\n"
        );
    }

    #[test]
    fn test_application_section_passes_through() {
        let sdp = "v=0\nm=application 9 UDP/DTLS/SCTP webrtc-datachannel\na=sctp-port:5000\nm=video 9 RTP/AVP 96 97\na=rtpmap:96 H264/90000\na=rtpmap:97 VP8/90000";
        let pref = CodecPreference::parse("video/vp8").unwrap();

        assert_eq!(
            filter_preferred_codec(sdp, &pref),
            "v=0\nm=application 9 UDP/DTLS/SCTP webrtc-datachannel\na=sctp-port:5000\nm=video 9 RTP/AVP 97\na=rtpmap:97 VP8/90000"
        );
    }

    #[test]
    fn test_media_kind_match_is_case_sensitive() {
        let sdp = "m=VIDEO 9 RTP/AVP 96 97\na=rtpmap:96 H264/90000\na=rtpmap:97 VP8/90000\n";
        let pref = CodecPreference::parse("video/h264").unwrap();

        assert_eq!(filter_preferred_codec(sdp, &pref), sdp);
    }

    #[test]
    fn test_m_line_lists_matches_in_section_order() {
        let cases = [
            (vec!["VP8", "H264", "VP9", "H264"], vec!["96", "97", "98", "99"], "97 99"),
            (vec!["H264", "H264", "H264"], vec!["102", "100", "101"], "102 100 101"),
            (vec!["AV1", "h264"], vec!["45", "35"], "35"),
        ];

        for (codecs, payloads, expected) in cases {
            let mut sdp = format!("m=video 9 UDP/TLS/RTP/SAVPF {}\r\n", payloads.join(" "));
            for (codec, payload) in codecs.iter().zip(&payloads) {
                sdp.push_str(&format!("a=rtpmap:{} {}/90000\r\n", payload, codec));
            }

            let pref = CodecPreference::parse("video/H264").unwrap();
            let filtered = filter_preferred_codec(&sdp, &pref);
            let m_line = filtered.split("\r\n").next().unwrap();

            assert_eq!(m_line, format!("m=video 9 UDP/TLS/RTP/SAVPF {}", expected));
        }
    }

    #[test]
    fn test_empty_sdp() {
        let pref = CodecPreference::parse("video/h264").unwrap();
        assert_eq!(filter_preferred_codec("", &pref), "");
    }
}
