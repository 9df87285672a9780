//! Media entries of navigation responses.
//!
//! A navigation response is a `<MediaContainer>` whose direct children are
//! the entries of the browsed path:
//!
//! ```xml
//! <MediaContainer size="2" viewGroup="movie">
//!   <Directory key="all" title="All Movies"/>
//!   <Video ratingKey="10" key="/library/metadata/10" type="movie" title="Film"
//!          duration="5400000" thumb="/library/metadata/10/thumb/1">
//!     <Media videoResolution="1080" videoCodec="h264" bitrate="8000">
//!       <Part key="/library/parts/20/file.mkv" size="1000" file="/data/Film.mkv">
//!         <Stream streamType="3" languageCode="eng" codec="srt" key="/library/streams/7"/>
//!       </Part>
//!     </Media>
//!     <Chapter tag="Opening" startTimeOffset="0" endTimeOffset="60000"/>
//!   </Video>
//! </MediaContainer>
//! ```
//!
//! Every child is classified by its kind into a [`MediaEntry`]:
//!
//! * kinds in [`SCHEMA`] become containers or playable items
//! * any other kind becomes [`MediaEntry::Unsupported`] with its raw
//!   attributes, so callers can still list it
//!
//! Children missing a field their kind requires are skipped and counted as
//! dropped. Numeric attributes that do not parse are treated as absent.

use std::{collections::BTreeMap, time::Duration};

use serde::Serialize;
use serde_with::{serde_as, skip_serializing_none, DurationMilliSeconds};

use super::Node;
use crate::{
    normalize::{Listing, Record, Verdict},
    target::{is_absolute, resolve_resource_url, ServerTarget},
};

/// How entries of a kind are presented.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Shape {
    /// Browsable, has children.
    Container,
    /// Has a stream that can be played.
    Playable,
}

/// Known entry kinds and their shape.
pub const SCHEMA: &[(&str, Shape)] = &[
    ("movie", Shape::Playable),
    ("episode", Shape::Playable),
    ("clip", Shape::Playable),
    ("track", Shape::Playable),
    ("photo", Shape::Playable),
    ("show", Shape::Container),
    ("season", Shape::Container),
    ("album", Shape::Container),
    ("artist", Shape::Container),
    ("folder", Shape::Container),
];

/// Kinds implied by element names when no `type` attribute is present.
const ELEMENT_KINDS: &[(&str, &str)] = &[
    ("Directory", "folder"),
    ("Video", "clip"),
    ("Track", "track"),
    ("Photo", "photo"),
];

/// Element that is always browsable, whatever its kind.
const DIRECTORY: &str = "Directory";

/// Value of `streamType` for subtitle streams.
const SUBTITLE_STREAM: &str = "3";

/// Shape of a known kind.
#[must_use]
pub fn shape_of(kind: &str) -> Option<Shape> {
    SCHEMA
        .iter()
        .find(|(known, _)| *known == kind)
        .map(|(_, shape)| *shape)
}

/// Entry of a navigation response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum MediaEntry {
    Container(Container),
    Playable(PlayableItem),
    Unsupported(Unsupported),
}

impl MediaEntry {
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Container(container) => &container.kind,
            Self::Playable(item) => &item.kind,
            Self::Unsupported(unsupported) => &unsupported.kind,
        }
    }

    /// Server-assigned identifier, unique within a listing.
    #[must_use]
    pub fn identifier(&self) -> &str {
        match self {
            Self::Container(container) => &container.identifier,
            Self::Playable(item) => &item.identifier,
            Self::Unsupported(unsupported) => &unsupported.identifier,
        }
    }

    #[must_use]
    pub fn title(&self) -> Option<&str> {
        match self {
            Self::Container(container) => Some(&container.title),
            Self::Playable(item) => Some(&item.title),
            Self::Unsupported(unsupported) => unsupported.title.as_deref(),
        }
    }

    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Container(_))
    }

    #[must_use]
    pub fn is_playable(&self) -> bool {
        matches!(self, Self::Playable(_))
    }

    /// Resource URLs carried by the entry.
    fn urls(&self) -> Vec<&str> {
        match self {
            Self::Container(container) => container.thumbnail_url.iter().map(String::as_str).collect(),
            Self::Playable(item) => item
                .stream_url
                .iter()
                .chain(&item.thumbnail_url)
                .chain(item.subtitle_tracks.iter().filter_map(|track| track.url.as_ref()))
                .map(String::as_str)
                .collect(),
            Self::Unsupported(_) => Vec::new(),
        }
    }

    /// Reduces the entry to an unsupported one, keeping its fields as
    /// attributes.
    #[must_use]
    pub fn into_unsupported(self) -> Unsupported {
        let fields = match &self {
            Self::Container(container) => serde_json::to_value(container),
            Self::Playable(item) => serde_json::to_value(item),
            Self::Unsupported(unsupported) => return unsupported.clone(),
        };

        let mut attributes = BTreeMap::new();
        if let Ok(serde_json::Value::Object(fields)) = fields {
            for (name, value) in fields {
                if matches!(name.as_str(), "kind" | "identifier" | "title") {
                    continue;
                }
                let value = match value {
                    serde_json::Value::String(text) => text,
                    serde_json::Value::Number(number) => number.to_string(),
                    serde_json::Value::Bool(flag) => flag.to_string(),
                    _ => continue,
                };
                attributes.insert(name, value);
            }
        }

        Unsupported {
            kind: self.kind().to_owned(),
            identifier: self.identifier().to_owned(),
            title: self.title().map(str::to_owned),
            attributes,
        }
    }
}

impl Record for MediaEntry {
    type Key = String;

    fn key(&self) -> Self::Key {
        self.identifier().to_owned()
    }

    fn verify(self) -> Verdict<Self> {
        if self.identifier().trim().is_empty() {
            return Verdict::Drop;
        }

        let untitled = !matches!(self, Self::Unsupported(_))
            && self.title().is_none_or(|title| title.trim().is_empty());
        if untitled || !self.urls().into_iter().all(is_absolute) {
            return Verdict::Downgrade(Self::Unsupported(self.into_unsupported()));
        }

        Verdict::Keep(self)
    }
}

/// Browsable entry such as a show, season or folder.
#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Container {
    pub kind: String,
    pub identifier: String,
    pub title: String,
    pub child_count: Option<u64>,
    pub view_group: Option<String>,
    /// Navigation path that lists the children.
    pub browse_path: Option<String>,
    pub thumbnail_url: Option<String>,
    pub summary: Option<String>,
}

/// Entry with a stream, such as a movie, episode or track.
#[serde_as]
#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlayableItem {
    pub kind: String,
    pub identifier: String,
    pub title: String,

    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub duration: Option<Duration>,

    /// Video resolution as reported, e.g. `1080` or `4k`.
    pub resolution: Option<String>,
    /// Video codec, or the audio codec for audio-only items.
    pub codec: Option<String>,
    pub audio_codec: Option<String>,
    /// In kbit/s.
    pub bitrate: Option<u64>,
    pub container_format: Option<String>,
    /// In bytes.
    pub file_size: Option<u64>,
    pub file_name: Option<String>,
    pub stream_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub summary: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub chapters: Vec<Chapter>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subtitle_tracks: Vec<SubtitleTrack>,
}

/// Entry of a kind that is not presented natively.
#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Unsupported {
    pub kind: String,
    pub identifier: String,
    pub title: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

#[serde_as]
#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Chapter {
    pub title: String,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub start_offset: Duration,

    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub end_offset: Option<Duration>,
}

#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubtitleTrack {
    pub language: Option<String>,
    pub format: Option<String>,
    pub url: Option<String>,
}

/// Extracts the entries of a navigation response.
///
/// Entries come out in response order. Children that cannot be represented
/// are counted in [`Listing::dropped`]; no child ever fails the listing.
pub(crate) fn extract_media_entries(root: &Node, target: &ServerTarget) -> Listing<MediaEntry> {
    let mut listing = Listing::default();

    for node in &root.children {
        match extract(node, target) {
            Some(entry) => listing.items.push(entry),
            None => listing.dropped += 1,
        }
    }

    listing
}

/// Kind of an element: its `type` attribute or one implied by its name.
fn kind_of(node: &Node) -> String {
    if let Some(kind) = node.attr("type") {
        return kind.to_lowercase();
    }

    ELEMENT_KINDS
        .iter()
        .find(|(element, _)| *element == node.kind)
        .map_or_else(|| node.kind.to_lowercase(), |(_, kind)| (*kind).to_owned())
}

fn extract(node: &Node, target: &ServerTarget) -> Option<MediaEntry> {
    let kind = kind_of(node);

    let Some(identifier) = node.attr_any(&["ratingKey", "key"]) else {
        debug!("skipping <{}> of kind {kind}: no identifier", node.kind);
        return None;
    };
    let identifier = identifier.to_owned();

    let shape = if node.kind == DIRECTORY {
        Some(Shape::Container)
    } else {
        shape_of(&kind)
    };

    let Some(shape) = shape else {
        trace!("{kind} {identifier} is not a supported kind");
        return Some(MediaEntry::Unsupported(Unsupported {
            title: node.attr("title").map(str::to_owned),
            attributes: node.sorted_attributes(),
            kind,
            identifier,
        }));
    };

    let Some(title) = node.attr("title") else {
        debug!("skipping {kind} {identifier}: no title");
        return None;
    };
    let title = title.to_owned();

    let entry = match shape {
        Shape::Container => MediaEntry::Container(Container {
            child_count: node
                .attr_u64("childCount")
                .or_else(|| node.attr_u64("leafCount")),
            view_group: node.attr("viewGroup").map(str::to_owned),
            browse_path: node.attr("key").map(|key| target.child_path(key)),
            thumbnail_url: resolve(target, node.attr("thumb")),
            summary: node.attr("summary").map(str::to_owned),
            kind,
            identifier,
            title,
        }),
        Shape::Playable => MediaEntry::Playable(playable(node, target, kind, identifier, title)),
    };

    Some(entry)
}

fn playable(
    node: &Node,
    target: &ServerTarget,
    kind: String,
    identifier: String,
    title: String,
) -> PlayableItem {
    let media = node.find("Media");
    let part = media.and_then(|media| media.find("Part"));

    let media_attr = |name| media.and_then(|media| media.attr(name)).map(str::to_owned);

    let duration = node
        .attr_u64("duration")
        .or_else(|| media.and_then(|media| media.attr_u64("duration")))
        .map(Duration::from_millis);

    let subtitle_tracks = part
        .into_iter()
        .flat_map(|part| part.children_of_kind("Stream"))
        .filter(|stream| stream.attr("streamType") == Some(SUBTITLE_STREAM))
        .map(|stream| SubtitleTrack {
            language: stream
                .attr_any(&["languageCode", "language"])
                .map(str::to_owned),
            format: stream.attr_any(&["codec", "format"]).map(str::to_owned),
            url: resolve(target, stream.attr("key")),
        })
        .collect();

    let chapters = node
        .children_of_kind("Chapter")
        .map(|chapter| Chapter {
            title: chapter.attr("tag").unwrap_or_default().to_owned(),
            start_offset: Duration::from_millis(chapter.attr_u64("startTimeOffset").unwrap_or(0)),
            end_offset: chapter.attr_u64("endTimeOffset").map(Duration::from_millis),
        })
        .collect();

    PlayableItem {
        duration,
        resolution: media_attr("videoResolution"),
        codec: media_attr("videoCodec").or_else(|| media_attr("audioCodec")),
        audio_codec: media_attr("audioCodec"),
        bitrate: media.and_then(|media| media.attr_u64("bitrate")),
        container_format: media_attr("container")
            .or_else(|| part.and_then(|part| part.attr("container")).map(str::to_owned)),
        file_size: part.and_then(|part| part.attr_u64("size")),
        file_name: part
            .and_then(|part| part.attr("file"))
            .and_then(|file| file.rsplit(['/', '\\']).next())
            .filter(|name| !name.is_empty())
            .map(str::to_owned),
        stream_url: resolve(target, part.and_then(|part| part.attr("key"))),
        thumbnail_url: resolve(target, node.attr("thumb")),
        summary: node.attr("summary").map(str::to_owned),
        chapters,
        subtitle_tracks,
        kind,
        identifier,
        title,
    }
}

/// Resolves a resource path, leaving the field absent when that fails.
fn resolve(target: &ServerTarget, path: Option<&str>) -> Option<String> {
    let path = path?;
    match resolve_resource_url(target, path) {
        Ok(url) => Some(url),
        Err(e) => {
            debug!("cannot resolve {path}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{normalize::finalize, protocol::markup, target::build_request_target};

    fn target() -> ServerTarget {
        build_request_target("10.0.0.2", "32400", "/library/sections/1/all", "tok").unwrap()
    }

    fn entries(xml: &str) -> Listing<MediaEntry> {
        let root = markup::decode(xml.as_bytes()).unwrap();
        extract_media_entries(&root, &target())
    }

    const MOVIE: &str = r#"<MediaContainer size="1">
  <Video ratingKey="10" key="/library/metadata/10" type="movie" title="Film"
         summary="A film." duration="5400000" thumb="/library/metadata/10/thumb/1">
    <Media videoResolution="1080" videoCodec="h264" audioCodec="aac" bitrate="8000" container="mkv">
      <Part key="/library/parts/20/file.mkv" size="123456" file="/data/movies/Film (2020).mkv">
        <Stream streamType="1" codec="h264"/>
        <Stream streamType="3" languageCode="eng" codec="srt" key="/library/streams/7"/>
        <Stream streamType="3" language="Deutsch" format="ass"/>
      </Part>
    </Media>
    <Chapter tag="Opening" startTimeOffset="0" endTimeOffset="60000"/>
    <Chapter tag="Middle" startTimeOffset="60000" endTimeOffset="120000"/>
    <Chapter tag="Credits" startTimeOffset="120000"/>
  </Video>
</MediaContainer>"#;

    #[test]
    fn extracts_playable_movie() {
        let listing = entries(MOVIE);
        assert_eq!(listing.len(), 1);
        assert_eq!(listing.dropped, 0);

        let MediaEntry::Playable(item) = &listing.items[0] else {
            panic!("expected a playable item");
        };
        assert_eq!(item.kind, "movie");
        assert_eq!(item.identifier, "10");
        assert_eq!(item.title, "Film");
        assert_eq!(item.duration, Some(Duration::from_secs(5400)));
        assert_eq!(item.resolution.as_deref(), Some("1080"));
        assert_eq!(item.codec.as_deref(), Some("h264"));
        assert_eq!(item.audio_codec.as_deref(), Some("aac"));
        assert_eq!(item.bitrate, Some(8000));
        assert_eq!(item.container_format.as_deref(), Some("mkv"));
        assert_eq!(item.file_size, Some(123_456));
        assert_eq!(item.file_name.as_deref(), Some("Film (2020).mkv"));
        assert_eq!(
            item.stream_url.as_deref(),
            Some("http://10.0.0.2:32400/library/parts/20/file.mkv?X-Plex-Token=tok")
        );
        assert_eq!(
            item.thumbnail_url.as_deref(),
            Some("http://10.0.0.2:32400/library/metadata/10/thumb/1?X-Plex-Token=tok")
        );
    }

    #[test]
    fn chapters_and_subtitles_keep_order() {
        let listing = entries(MOVIE);
        let MediaEntry::Playable(item) = &listing.items[0] else {
            panic!("expected a playable item");
        };

        let titles: Vec<_> = item.chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, ["Opening", "Middle", "Credits"]);
        assert_eq!(item.chapters[1].start_offset, Duration::from_secs(60));
        assert_eq!(item.chapters[2].end_offset, None);

        assert_eq!(item.subtitle_tracks.len(), 2);
        assert_eq!(item.subtitle_tracks[0].language.as_deref(), Some("eng"));
        assert_eq!(item.subtitle_tracks[0].format.as_deref(), Some("srt"));
        assert!(item.subtitle_tracks[0].url.is_some());
        assert_eq!(item.subtitle_tracks[1].language.as_deref(), Some("Deutsch"));
        assert_eq!(item.subtitle_tracks[1].url, None);
    }

    #[test]
    fn entries_follow_response_order() {
        let listing = entries(
            r#"<MediaContainer>
                 <Directory key="all" title="All"/>
                 <Directory ratingKey="5" key="/library/metadata/5/children" type="show" title="Show" leafCount="12"/>
                 <Track ratingKey="7" title="Song" duration="180000"/>
               </MediaContainer>"#,
        );

        let identifiers: Vec<_> = listing.iter().map(MediaEntry::identifier).collect();
        assert_eq!(identifiers, ["all", "5", "7"]);

        let MediaEntry::Container(folder) = &listing.items[0] else {
            panic!("expected a container");
        };
        assert_eq!(folder.kind, "folder");
        assert_eq!(folder.browse_path.as_deref(), Some("/library/sections/1/all/all"));

        let MediaEntry::Container(show) = &listing.items[1] else {
            panic!("expected a container");
        };
        assert_eq!(show.child_count, Some(12));
        assert_eq!(show.browse_path.as_deref(), Some("/library/metadata/5/children"));

        assert!(listing.items[2].is_playable());
        assert_eq!(listing.items[2].kind(), "track");
    }

    #[test]
    fn directory_of_playable_kind_is_browsable() {
        let listing = entries(r#"<MediaContainer><Directory key="1" type="movie" title="Movies"/></MediaContainer>"#);
        assert!(listing.items[0].is_container());
        assert_eq!(listing.items[0].kind(), "movie");
    }

    #[test]
    fn children_without_required_fields_are_dropped() {
        let listing = entries(
            r#"<MediaContainer>
                 <Video title="no identifier"/>
                 <Video ratingKey="2"/>
                 <Video ratingKey="3" title="  "/>
                 <Video ratingKey="4" title="kept"/>
               </MediaContainer>"#,
        );

        assert_eq!(listing.len(), 1);
        assert_eq!(listing.dropped, 3);
        assert_eq!(listing.items[0].identifier(), "4");
    }

    #[test]
    fn empty_container_has_no_entries() {
        let listing = entries(r#"<MediaContainer size="0" viewGroup="secondary"/>"#);
        assert!(listing.is_empty());
        assert!(!listing.is_lossy());
    }

    #[test]
    fn unknown_kind_is_unsupported_with_attributes() {
        let listing = entries(
            r#"<MediaContainer><Playlist ratingKey="99" playlistType="video" smart="1"/></MediaContainer>"#,
        );

        let MediaEntry::Unsupported(entry) = &listing.items[0] else {
            panic!("expected an unsupported entry");
        };
        assert_eq!(entry.kind, "playlist");
        assert_eq!(entry.identifier, "99");
        assert_eq!(entry.title, None);
        assert_eq!(entry.attributes.get("playlistType").map(String::as_str), Some("video"));
    }

    #[test]
    fn unparsable_numbers_are_absent() {
        let listing = entries(
            r#"<MediaContainer>
                 <Video ratingKey="1" title="x" duration="long">
                   <Media bitrate="fast"><Part size="-5" key="/p"/></Media>
                 </Video>
               </MediaContainer>"#,
        );

        let MediaEntry::Playable(item) = &listing.items[0] else {
            panic!("expected a playable item");
        };
        assert_eq!(item.duration, None);
        assert_eq!(item.bitrate, None);
        assert_eq!(item.file_size, None);
        assert!(item.stream_url.is_some());
    }

    #[test]
    fn duration_falls_back_to_media() {
        let listing = entries(
            r#"<MediaContainer><Track ratingKey="1" title="x"><Media duration="2500" audioCodec="flac"/></Track></MediaContainer>"#,
        );

        let MediaEntry::Playable(item) = &listing.items[0] else {
            panic!("expected a playable item");
        };
        assert_eq!(item.duration, Some(Duration::from_millis(2500)));
        assert_eq!(item.codec.as_deref(), Some("flac"));
    }

    #[test]
    fn relative_urls_are_downgraded() {
        let entry = MediaEntry::Playable(PlayableItem {
            kind: "clip".into(),
            identifier: "1".into(),
            title: "x".into(),
            duration: Some(Duration::from_millis(1500)),
            resolution: None,
            codec: None,
            audio_codec: None,
            bitrate: None,
            container_format: None,
            file_size: None,
            file_name: None,
            stream_url: Some("/relative".into()),
            thumbnail_url: None,
            summary: None,
            chapters: Vec::new(),
            subtitle_tracks: Vec::new(),
        });

        let listing = finalize(Listing {
            items: vec![entry],
            ..Listing::default()
        });

        assert_eq!(listing.downgraded, 1);
        let MediaEntry::Unsupported(entry) = &listing.items[0] else {
            panic!("expected an unsupported entry");
        };
        assert_eq!(entry.kind, "clip");
        assert_eq!(entry.title.as_deref(), Some("x"));
        assert_eq!(entry.attributes.get("stream_url").map(String::as_str), Some("/relative"));
        assert_eq!(entry.attributes.get("duration").map(String::as_str), Some("1500"));
    }

    #[test]
    fn duplicates_keep_first() {
        let listing = finalize(entries(
            r#"<MediaContainer>
                 <Track ratingKey="1" title="first"/>
                 <Track ratingKey="1" title="second"/>
               </MediaContainer>"#,
        ));

        assert_eq!(listing.len(), 1);
        assert_eq!(listing.duplicates, 1);
        assert_eq!(listing.items[0].title(), Some("first"));
    }

    #[test]
    fn schema_shapes() {
        assert_eq!(shape_of("episode"), Some(Shape::Playable));
        assert_eq!(shape_of("season"), Some(Shape::Container));
        assert_eq!(shape_of("playlist"), None);
    }
}
