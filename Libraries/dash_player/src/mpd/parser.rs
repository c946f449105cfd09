use std::collections::HashMap;
use std::sync::LazyLock;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use tracing::{debug, warn};
use url::Url;

use crate::error::ManifestError;
use crate::mpd::{Manifest, Representation, Segment};

/// Upper bound on segments derived from a `SegmentTemplate` per representation.
const MAX_TEMPLATE_SEGMENTS: f64 = 1_000_000.0;

static NUMBER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$Number(?::%0(\d+)d|%0(\d+)d)?\$").expect("valid number pattern"));

static SIZE_HINT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_(\d+(?:\.\d+)?)kbit").expect("valid size hint pattern"));

/// `SegmentList` contents collected while walking the document.
#[derive(Debug, Default, Clone)]
struct SegmentListDef {
    duration: Option<f64>,
    timescale: Option<f64>,
    initialization: Option<String>,
    media: Vec<String>,
}

#[derive(Debug, Default)]
struct AdaptationDef {
    skip: bool,
    base_url: Option<String>,
    template: HashMap<String, String>,
    list: Option<SegmentListDef>,
    initialization: Option<String>,
}

#[derive(Debug, Default)]
struct RepresentationDef {
    id: String,
    bandwidth: u64,
    skip: bool,
    base_url: Option<String>,
    template: HashMap<String, String>,
    list: Option<SegmentListDef>,
    initialization: Option<String>,
}

/// A representation waiting for URL resolution: adaptation-level base URL, the
/// representation itself, merged template attributes, segment list and
/// adaptation-level initialization.
type Pending = (Option<String>, RepresentationDef, HashMap<String, String>, Option<SegmentListDef>, Option<String>);

fn is_audio(value: &str) -> bool {
    value.contains("audio")
}

fn attributes(e: &BytesStart) -> Result<HashMap<String, String>, ManifestError> {
    let mut map = HashMap::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = std::str::from_utf8(attr.key.local_name().as_ref())?.to_string();
        let value = attr.unescape_value()?.to_string();
        map.insert(key, value);
    }
    Ok(map)
}

/// Parses an MPD document into the video representations it describes.
/// Relative segment URLs resolve against `BaseURL` elements and `mpd_url`.
pub fn parse_mpd(xml: &str, mpd_url: &str) -> Result<Manifest, ManifestError> {
    let root_url = Url::parse(mpd_url).map_err(|e| ManifestError::Parse(format!("bad manifest URL: {e}")))?;
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut playback_duration = None;
    let mut min_buffer_time = None;
    let mut mpd_base: Option<String> = None;
    let mut in_base_url = false;
    let mut in_segment_list = false;

    let mut adaptation: Option<AdaptationDef> = None;
    let mut representation: Option<RepresentationDef> = None;
    let mut pending: Vec<Pending> = vec![];

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                let name = e.local_name();
                let tag = std::str::from_utf8(name.as_ref())?;
                match tag {
                    "MPD" => {
                        let attrs = attributes(e)?;
                        playback_duration = attrs.get("mediaPresentationDuration").and_then(|v| parse_duration(v));
                        min_buffer_time = attrs.get("minBufferTime").and_then(|v| parse_duration(v));
                    }
                    "BaseURL" => in_base_url = !is_empty,
                    "AdaptationSet" => {
                        let attrs = attributes(e)?;
                        let skip = ["mimeType", "contentType"]
                            .iter()
                            .filter_map(|k| attrs.get(*k))
                            .any(|v| is_audio(v) || v.contains("text"));
                        adaptation = Some(AdaptationDef { skip, ..AdaptationDef::default() });
                    }
                    "Representation" => {
                        let attrs = attributes(e)?;
                        let bandwidth = match attrs.get("bandwidth") {
                            Some(value) => value
                                .parse::<u64>()
                                .map_err(|err| ManifestError::Parse(format!("bad bandwidth {value:?}: {err}")))?,
                            None => 0,
                        };
                        let rep = RepresentationDef {
                            id: attrs.get("id").cloned().unwrap_or_default(),
                            bandwidth,
                            skip: attrs.get("mimeType").is_some_and(|m| is_audio(m)),
                            ..RepresentationDef::default()
                        };
                        if is_empty {
                            finish(&adaptation, rep, &mut pending);
                        } else {
                            representation = Some(rep);
                        }
                    }
                    "SegmentTemplate" => {
                        let attrs = attributes(e)?;
                        if let Some(rep) = representation.as_mut() {
                            rep.template = attrs;
                        } else if let Some(adapt) = adaptation.as_mut() {
                            adapt.template = attrs;
                        }
                    }
                    "SegmentList" => {
                        let attrs = attributes(e)?;
                        let list = SegmentListDef {
                            duration: attrs.get("duration").and_then(|v| v.parse().ok()),
                            timescale: attrs.get("timescale").and_then(|v| v.parse().ok()),
                            ..SegmentListDef::default()
                        };
                        in_segment_list = !is_empty;
                        if let Some(rep) = representation.as_mut() {
                            rep.list = Some(list);
                        } else if let Some(adapt) = adaptation.as_mut() {
                            adapt.list = Some(list);
                        }
                    }
                    "SegmentURL" => {
                        if let Some(media) = attributes(e)?.remove("media") {
                            if let Some(list) = current_list(&mut representation, &mut adaptation) {
                                list.media.push(media);
                            }
                        }
                    }
                    "Initialization" => {
                        if let Some(source) = attributes(e)?.remove("sourceURL") {
                            if in_segment_list {
                                if let Some(list) = current_list(&mut representation, &mut adaptation) {
                                    list.initialization = Some(source);
                                }
                            } else if let Some(rep) = representation.as_mut() {
                                rep.initialization = Some(source);
                            } else if let Some(adapt) = adaptation.as_mut() {
                                adapt.initialization = Some(source);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(ref t) if in_base_url => {
                let text = t.unescape()?.trim().to_string();
                if let Some(rep) = representation.as_mut() {
                    rep.base_url = Some(text);
                } else if let Some(adapt) = adaptation.as_mut() {
                    adapt.base_url = Some(text);
                } else {
                    mpd_base = Some(text);
                }
            }
            Event::End(ref e) => {
                let name = e.local_name();
                match std::str::from_utf8(name.as_ref())? {
                    "BaseURL" => in_base_url = false,
                    "SegmentList" => in_segment_list = false,
                    "Representation" => {
                        if let Some(rep) = representation.take() {
                            finish(&adaptation, rep, &mut pending);
                        }
                    }
                    "AdaptationSet" => adaptation = None,
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let playback_duration = playback_duration
        .ok_or_else(|| ManifestError::Parse("missing mediaPresentationDuration".to_string()))?;
    let root = match &mpd_base {
        Some(base) => root_url
            .join(base)
            .map_err(|e| ManifestError::Parse(format!("bad BaseURL {base:?}: {e}")))?,
        None => root_url,
    };

    let mut representations = Vec::with_capacity(pending.len());
    for (adaptation_base, rep, template, list, adaptation_init) in pending {
        let mut base = root.clone();
        for level in [adaptation_base.as_deref(), rep.base_url.as_deref()].into_iter().flatten() {
            base = base
                .join(level)
                .map_err(|e| ManifestError::Parse(format!("bad BaseURL {level:?}: {e}")))?;
        }
        match build_representation(&base, rep, &template, list, adaptation_init, playback_duration)? {
            Some(built) => representations.push(built),
            None => continue,
        }
    }

    Ok(Manifest::new(mpd_url, playback_duration, representations)?.with_min_buffer_time(min_buffer_time))
}

/// Queues a representation together with what it inherits from its adaptation set.
fn finish(adaptation: &Option<AdaptationDef>, rep: RepresentationDef, pending: &mut Vec<Pending>) {
    let Some(adapt) = adaptation.as_ref() else {
        warn!("Representation {} outside of an AdaptationSet, ignoring", rep.id);
        return;
    };
    if adapt.skip || rep.skip {
        debug!("Skipping non-video representation {}", rep.id);
        return;
    }
    let mut template = adapt.template.clone();
    template.extend(rep.template.clone());
    let list = rep.list.clone().or_else(|| adapt.list.clone());
    let init = adapt.initialization.clone();
    pending.push((adapt.base_url.clone(), rep, template, list, init));
}

fn current_list<'a>(
    representation: &'a mut Option<RepresentationDef>,
    adaptation: &'a mut Option<AdaptationDef>,
) -> Option<&'a mut SegmentListDef> {
    match representation.as_mut() {
        Some(rep) => rep.list.as_mut(),
        None => adaptation.as_mut().and_then(|a| a.list.as_mut()),
    }
}

fn build_representation(
    base: &Url,
    rep: RepresentationDef,
    template: &HashMap<String, String>,
    list: Option<SegmentListDef>,
    adaptation_init: Option<String>,
    playback_duration: f64,
) -> Result<Option<Representation>, ManifestError> {
    let resolve = |path: &str| -> Result<String, ManifestError> {
        base.join(path)
            .map(|u| u.to_string())
            .map_err(|e| ManifestError::Parse(format!("bad segment URL {path:?}: {e}")))
    };
    let estimate = |duration: f64| (rep.bandwidth as f64 * duration / 8.0).round() as u64;

    if let Some(media) = template.get("media") {
        let timescale = template.get("timescale").and_then(|v| v.parse::<f64>().ok()).unwrap_or(1.0);
        let Some(units) = template.get("duration").and_then(|v| v.parse::<f64>().ok()) else {
            warn!("Representation {} uses a SegmentTemplate without duration, ignoring", rep.id);
            return Ok(None);
        };
        let segment_duration = units / timescale;
        if segment_duration <= 0.0 || playback_duration <= 0.0 {
            return Err(ManifestError::Parse(format!(
                "cannot derive segment count for {} from duration {segment_duration}",
                rep.id
            )));
        }
        let start = template.get("startNumber").and_then(|v| v.parse::<u64>().ok()).unwrap_or(1);
        let count = (playback_duration / segment_duration).ceil();
        if count.is_nan() || count > MAX_TEMPLATE_SEGMENTS {
            return Err(ManifestError::Parse(format!(
                "{} would need {count} segments of {segment_duration}s, more than {MAX_TEMPLATE_SEGMENTS}",
                rep.id
            )));
        }
        let count = count as u64;
        let mut segments = Vec::with_capacity(count as usize);
        for i in 0..count {
            let duration = (playback_duration - i as f64 * segment_duration).min(segment_duration);
            let path = expand_template(media, &rep.id, rep.bandwidth, start + i, (i as f64 * units) as u64);
            segments.push(Segment {
                sequence_number: start + i,
                url: resolve(&path)?,
                byte_size: estimate(duration),
                duration,
            });
        }
        let initialization = template
            .get("initialization")
            .or(rep.initialization.as_ref())
            .or(adaptation_init.as_ref())
            .map(|init| resolve(&expand_template(init, &rep.id, rep.bandwidth, start, 0)))
            .transpose()?;
        return Ok(Some(Representation {
            id: rep.id,
            bandwidth: rep.bandwidth,
            initialization,
            segments,
        }));
    }

    if let Some(list) = list {
        let segment_duration = list.duration.unwrap_or(0.0) / list.timescale.unwrap_or(1.0);
        if segment_duration <= 0.0 {
            warn!("Representation {} uses a SegmentList without duration, ignoring", rep.id);
            return Ok(None);
        }
        let mut segments = Vec::with_capacity(list.media.len());
        for (i, media) in list.media.iter().enumerate() {
            let byte_size = size_hint(media).unwrap_or_else(|| estimate(segment_duration));
            segments.push(Segment {
                sequence_number: i as u64 + 1,
                url: resolve(media)?,
                byte_size,
                duration: segment_duration,
            });
        }
        let initialization = list
            .initialization
            .or(rep.initialization)
            .or(adaptation_init)
            .map(|init| resolve(&init))
            .transpose()?;
        return Ok(Some(Representation {
            id: rep.id,
            bandwidth: rep.bandwidth,
            initialization,
            segments,
        }));
    }

    warn!("Representation {} has no segment addressing, ignoring", rep.id);
    Ok(None)
}

/// Substitutes the DASH template identifiers in `template`.
pub fn expand_template(template: &str, id: &str, bandwidth: u64, number: u64, time: u64) -> String {
    let replaced = template
        .replace("$RepresentationID$", id)
        .replace("$Bandwidth$", &bandwidth.to_string())
        .replace("$Time$", &time.to_string());
    NUMBER_PATTERN
        .replace_all(&replaced, |caps: &regex::Captures| {
            match caps.get(1).or_else(|| caps.get(2)) {
                Some(width) => format!("{:0width$}", number, width = width.as_str().parse::<usize>().unwrap_or(1)),
                None => number.to_string(),
            }
        })
        .replace("$$", "$")
}

/// Segment lists that encode the size as `_<N>kbit` in the path carry an exact size.
fn size_hint(media: &str) -> Option<u64> {
    let caps = SIZE_HINT_PATTERN.captures(media)?;
    let kbits = caps.get(1)?.as_str().parse::<f64>().ok()?;
    Some((kbits * 1024.0 / 8.0).round() as u64)
}

fn parse_duration(value: &str) -> Option<f64> {
    let iso = iso8601_duration::Duration::parse(value).ok()?;
    iso.to_std().map(|d| d.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE_MPD: &str = r#"<?xml version="1.0"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" mediaPresentationDuration="PT0H0M9.0S" minBufferTime="PT2S">
  <Period>
    <AdaptationSet mimeType="video/mp4">
      <SegmentTemplate media="$RepresentationID$/seg_$Number%05d$.m4s" initialization="$RepresentationID$/init.mp4" startNumber="1" duration="4000" timescale="1000"/>
      <Representation id="high" bandwidth="2000000"/>
      <Representation id="low" bandwidth="500000"/>
    </AdaptationSet>
    <AdaptationSet mimeType="audio/mp4">
      <Representation id="audio" bandwidth="128000">
        <SegmentTemplate media="a_$Number$.m4s" duration="4"/>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;

    #[test]
    fn parses_segment_template() {
        let manifest = parse_mpd(TEMPLATE_MPD, "http://cdn.test/video/manifest.mpd").unwrap();
        assert_eq!(manifest.bitrates(), vec![500_000, 2_000_000]);
        assert_eq!(manifest.min_buffer_time, Some(2.0));

        let low = manifest.representation(0);
        assert_eq!(low.id, "low");
        assert_eq!(low.segments.len(), 3);
        assert_eq!(low.segments[0].url, "http://cdn.test/video/low/seg_00001.m4s");
        assert_eq!(low.segments[2].sequence_number, 3);
        // 9s presentation with 4s segments leaves a 1s tail
        assert!((low.segments[2].duration - 1.0).abs() < 1e-9);
        assert_eq!(low.segments[0].byte_size, 250_000);
        assert_eq!(low.initialization.as_deref(), Some("http://cdn.test/video/low/init.mp4"));
    }

    #[test]
    fn parses_segment_list_with_size_hints() {
        let xml = r#"<MPD mediaPresentationDuration="PT4S">
  <BaseURL>http://origin.test/media/</BaseURL>
  <Period>
    <AdaptationSet mimeType="video/mp4">
      <Representation id="r1" bandwidth="1000000">
        <SegmentList duration="2">
          <Initialization sourceURL="init.mp4"/>
          <SegmentURL media="clip_900kbit/1.m4s"/>
          <SegmentURL media="clip_1100kbit/2.m4s"/>
        </SegmentList>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;
        let manifest = parse_mpd(xml, "http://cdn.test/x.mpd").unwrap();
        let rep = manifest.representation(0);
        assert_eq!(rep.segments.len(), 2);
        assert_eq!(rep.segments[0].url, "http://origin.test/media/clip_900kbit/1.m4s");
        assert_eq!(rep.segments[0].byte_size, 115_200);
        assert_eq!(rep.segments[1].byte_size, 140_800);
        assert_eq!(rep.initialization.as_deref(), Some("http://origin.test/media/init.mp4"));
    }

    #[test]
    fn manifest_without_video_is_empty() {
        let xml = r#"<MPD mediaPresentationDuration="PT4S"><Period>
  <AdaptationSet contentType="audio"><Representation id="a" bandwidth="1"><SegmentTemplate media="a$Number$" duration="2"/></Representation></AdaptationSet>
</Period></MPD>"#;
        assert!(matches!(parse_mpd(xml, "http://cdn.test/x.mpd"), Err(ManifestError::Empty)));
    }

    #[test]
    fn rejects_templates_with_absurd_segment_counts() {
        let xml = r#"<MPD mediaPresentationDuration="PT24H"><Period>
  <AdaptationSet mimeType="video/mp4">
    <SegmentTemplate media="$Number$.m4s" duration="1" timescale="1000000"/>
    <Representation id="v" bandwidth="1000"/>
  </AdaptationSet>
</Period></MPD>"#;
        let error = parse_mpd(xml, "http://cdn.test/x.mpd").unwrap_err();
        assert!(matches!(&error, ManifestError::Parse(msg) if msg.contains("segments")));
    }

    #[test]
    fn expands_number_formats() {
        assert_eq!(expand_template("$RepresentationID$_$Number$.m4v", "bbb", 1, 7, 0), "bbb_7.m4v");
        assert_eq!(expand_template("s$Number%03d$-$Bandwidth$", "x", 800, 7, 0), "s007-800");
        assert_eq!(expand_template("t$Time$", "x", 1, 1, 4000), "t4000");
    }
}
