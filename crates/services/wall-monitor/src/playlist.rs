//! Minimal live playlist parsing
//!
//! Understands just enough of the HLS playlist format to follow a live
//! stream: master playlists (variant list and audio renditions) and media
//! playlists (target duration, media sequence, segments, end marker).

use camwall_core::{LevelInfo, Resolution};
use url::Url;

/// Playlist parse errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlaylistError {
    #[error("missing #EXTM3U header")]
    MissingHeader,

    #[error("invalid {tag} on line {line}")]
    InvalidTag { tag: &'static str, line: usize },

    #[error("segment on line {line} has no #EXTINF")]
    SegmentWithoutDuration { line: usize },

    #[error("unresolvable URI {0}")]
    InvalidUri(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub url: Url,
    pub bandwidth: Option<u64>,
    pub resolution: Option<Resolution>,
}

impl Variant {
    pub fn level(&self) -> LevelInfo {
        LevelInfo {
            resolution: self.resolution,
            bitrate: self.bandwidth,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub url: Url,
    /// Seconds
    pub duration: f64,
    /// Media sequence number of this segment
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Playlist {
    Master {
        variants: Vec<Variant>,
        audio_tracks: usize,
    },
    Media(MediaPlaylist),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    /// Whole seconds
    pub target_duration: u64,
    pub media_sequence: u64,
    pub segments: Vec<Segment>,
    /// `#EXT-X-ENDLIST` seen; the stream will not grow
    pub ended: bool,
}

impl MediaPlaylist {
    /// Sequence number one past the newest segment
    pub fn next_sequence(&self) -> u64 {
        self.media_sequence + self.segments.len() as u64
    }
}

fn resolve(base: &Url, uri: &str) -> Result<Url, PlaylistError> {
    base.join(uri)
        .map_err(|_| PlaylistError::InvalidUri(uri.to_string()))
}

fn attribute<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    attrs.split(',').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key.trim() == name).then(|| value.trim().trim_matches('"'))
    })
}

/// Parse a playlist fetched from `base`
pub fn parse(text: &str, base: &Url) -> Result<Playlist, PlaylistError> {
    let mut lines = text.lines().map(str::trim).enumerate();
    match lines.next() {
        Some((_, "#EXTM3U")) => {}
        _ => return Err(PlaylistError::MissingHeader),
    }

    let mut variants = Vec::new();
    let mut audio_tracks = 0;
    let mut pending_variant: Option<(Option<u64>, Option<Resolution>)> = None;

    let mut target_duration = None;
    let mut media_sequence = 0;
    let mut segments = Vec::new();
    let mut pending_duration = None;
    let mut ended = false;

    for (idx, line) in lines {
        let line_no = idx + 1;
        if line.is_empty() {
            continue;
        }

        if let Some(attrs) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            let bandwidth = attribute(attrs, "BANDWIDTH").and_then(|b| b.parse().ok());
            let resolution = attribute(attrs, "RESOLUTION").and_then(|r| r.parse().ok());
            pending_variant = Some((bandwidth, resolution));
        } else if let Some(attrs) = line.strip_prefix("#EXT-X-MEDIA:") {
            if attribute(attrs, "TYPE") == Some("AUDIO") {
                audio_tracks += 1;
            }
        } else if let Some(value) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            let parsed = value.parse::<u64>().map_err(|_| PlaylistError::InvalidTag {
                tag: "#EXT-X-TARGETDURATION",
                line: line_no,
            })?;
            target_duration = Some(parsed);
        } else if let Some(value) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            media_sequence = value.parse().map_err(|_| PlaylistError::InvalidTag {
                tag: "#EXT-X-MEDIA-SEQUENCE",
                line: line_no,
            })?;
        } else if let Some(value) = line.strip_prefix("#EXTINF:") {
            let duration = value.split(',').next().unwrap_or_default();
            let parsed = duration
                .parse::<f64>()
                .ok()
                .filter(|d| d.is_finite() && *d >= 0.0)
                .ok_or(PlaylistError::InvalidTag {
                    tag: "#EXTINF",
                    line: line_no,
                })?;
            pending_duration = Some(parsed);
        } else if line == "#EXT-X-ENDLIST" {
            ended = true;
        } else if line.starts_with('#') {
            // Unhandled tag or comment
        } else if let Some((bandwidth, resolution)) = pending_variant.take() {
            variants.push(Variant {
                url: resolve(base, line)?,
                bandwidth,
                resolution,
            });
        } else {
            let duration = pending_duration
                .take()
                .ok_or(PlaylistError::SegmentWithoutDuration { line: line_no })?;
            segments.push(Segment {
                url: resolve(base, line)?,
                duration,
                sequence: media_sequence + segments.len() as u64,
            });
        }
    }

    if !variants.is_empty() {
        return Ok(Playlist::Master {
            variants,
            audio_tracks,
        });
    }

    let target_duration = target_duration.ok_or(PlaylistError::InvalidTag {
        tag: "#EXT-X-TARGETDURATION",
        line: 0,
    })?;

    Ok(Playlist::Media(MediaPlaylist {
        target_duration,
        media_sequence,
        segments,
        ended,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://nvr.local:8000/hls/cam/1/low/index.m3u8").unwrap()
    }

    #[test]
    fn test_parse_live_media_playlist() {
        let text = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n#EXT-X-MEDIA-SEQUENCE:41\n\
                    #EXTINF:2.000,\nseg41.ts\n#EXTINF:1.960,\nseg42.ts\n";
        let Playlist::Media(media) = parse(text, &base()).unwrap() else {
            panic!("expected media playlist");
        };
        assert_eq!(media.target_duration, 2);
        assert_eq!(media.segments.len(), 2);
        assert_eq!(media.segments[1].sequence, 42);
        assert_eq!(media.segments[1].duration, 1.96);
        assert_eq!(
            media.segments[0].url.as_str(),
            "http://nvr.local:8000/hls/cam/1/low/seg41.ts"
        );
        assert_eq!(media.next_sequence(), 43);
        assert!(!media.ended);
    }

    #[test]
    fn test_parse_master_playlist() {
        let text = "#EXTM3U\n\
                    #EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aac\",NAME=\"main\",URI=\"audio.m3u8\"\n\
                    #EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360,AUDIO=\"aac\"\n\
                    stream.m3u8\n";
        match parse(text, &base()).unwrap() {
            Playlist::Master {
                variants,
                audio_tracks,
            } => {
                assert_eq!(variants.len(), 1);
                assert_eq!(variants[0].bandwidth, Some(800_000));
                assert_eq!(
                    variants[0].level(),
                    LevelInfo {
                        resolution: Some(Resolution {
                            width: 640,
                            height: 360
                        }),
                        bitrate: Some(800_000),
                    }
                );
                assert!(variants[0].url.as_str().ends_with("/low/stream.m3u8"));
                assert_eq!(audio_tracks, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse("garbage", &base()), Err(PlaylistError::MissingHeader));
        assert!(matches!(
            parse("#EXTM3U\n#EXT-X-TARGETDURATION:2\nseg.ts\n", &base()),
            Err(PlaylistError::SegmentWithoutDuration { line: 3 })
        ));
        assert!(matches!(
            parse("#EXTM3U\n#EXT-X-MEDIA-SEQUENCE:abc\n", &base()),
            Err(PlaylistError::InvalidTag { line: 2, .. })
        ));
    }

    #[test]
    fn test_target_duration_must_be_whole_seconds() {
        for value in ["inf", "NaN", "2.5", "-1", "99999999999999999999999"] {
            let text = format!("#EXTM3U\n#EXT-X-TARGETDURATION:{}\n#EXTINF:2,\na.ts\n", value);
            assert_eq!(
                parse(&text, &base()),
                Err(PlaylistError::InvalidTag {
                    tag: "#EXT-X-TARGETDURATION",
                    line: 2
                }),
                "accepted {}",
                value
            );
        }
    }

    #[test]
    fn test_segment_duration_must_be_finite() {
        for value in ["inf", "NaN", "-2.0", "1e400"] {
            let text = format!("#EXTM3U\n#EXT-X-TARGETDURATION:2\n#EXTINF:{},\na.ts\n", value);
            assert_eq!(
                parse(&text, &base()),
                Err(PlaylistError::InvalidTag {
                    tag: "#EXTINF",
                    line: 3
                }),
                "accepted {}",
                value
            );
        }
    }

    #[test]
    fn test_endlist() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:2\n#EXTINF:2,\na.ts\n#EXT-X-ENDLIST\n";
        let Playlist::Media(media) = parse(text, &base()).unwrap() else {
            panic!("expected media playlist");
        };
        assert!(media.ended);
    }
}
