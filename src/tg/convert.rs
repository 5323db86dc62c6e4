//! Conversions from raw TL objects to the archiver's model.
//!
//! Every snapshot keeps the `Debug` form of the TL object it came from as
//! its textual representation.

use crate::model::{
    AdminAction, Chat, DocumentRef, FileKind, FileLocation, MediaDisposition, MediaRef, PeerKey,
    RemoteAdminEvent, RemoteMessage, ResourceKind, ResourceMeta, StickerAttr, StickerSet,
    StickerSetRef, User,
};
use chrono::{DateTime, Utc};
use grammers_tl_types as tl;

pub fn datetime(ts: i32) -> DateTime<Utc> {
    DateTime::from_timestamp(ts as i64, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

pub fn peer_key(peer: &tl::enums::Peer) -> PeerKey {
    match peer {
        tl::enums::Peer::User(u) => PeerKey::User(u.user_id),
        tl::enums::Peer::Chat(c) => PeerKey::Chat(c.chat_id),
        tl::enums::Peer::Channel(c) => PeerKey::Channel(c.channel_id),
    }
}

/// Convert a message of `chat_id`. Empty messages have no content and are
/// dropped.
pub fn message(chat_id: i64, raw: &tl::enums::Message) -> Option<RemoteMessage> {
    match raw {
        tl::enums::Message::Message(m) => Some(RemoteMessage {
            id: m.id,
            chat_id,
            date: datetime(m.date),
            edit_date: m.edit_date.map(datetime),
            text: m.message.clone(),
            sender: m.from_id.as_ref().or(Some(&m.peer_id)).map(peer_key),
            media: m.media.as_ref().and_then(media),
            raw_repr: format!("{:?}", m),
        }),
        tl::enums::Message::Service(m) => Some(RemoteMessage {
            id: m.id,
            chat_id,
            date: datetime(m.date),
            edit_date: None,
            text: String::new(),
            sender: m.from_id.as_ref().map(peer_key),
            media: None,
            raw_repr: format!("{:?}", m),
        }),
        tl::enums::Message::Empty(_) => None,
    }
}

/// Name of the TL variant, taken from its `Debug` output.
fn variant_name<T: std::fmt::Debug>(value: &T) -> String {
    let repr = format!("{:?}", value);
    repr.split(|c: char| c == '(' || c == ' ' || c == '{')
        .next()
        .unwrap_or_default()
        .to_string()
}

fn unsupported(kind: &str, disposition: MediaDisposition) -> Option<MediaRef> {
    Some(MediaRef::Unsupported {
        kind: kind.to_string(),
        disposition,
    })
}

pub fn media(raw: &tl::enums::MessageMedia) -> Option<MediaRef> {
    use tl::enums::MessageMedia as M;
    match raw {
        M::Empty => None,
        M::Photo(p) => match &p.photo {
            Some(tl::enums::Photo::Photo(photo)) => Some(MediaRef::Photo {
                location: photo_location(photo),
            }),
            _ => Some(MediaRef::Expired {
                kind: "Photo".into(),
            }),
        },
        M::Document(d) => match &d.document {
            Some(tl::enums::Document::Document(doc)) => Some(MediaRef::Document {
                document: document(doc),
            }),
            _ => Some(MediaRef::Expired {
                kind: "Document".into(),
            }),
        },
        M::Geo(_) => unsupported("Geo", MediaDisposition::NoAction),
        M::GeoLive(_) => unsupported("GeoLive", MediaDisposition::NoAction),
        M::Dice(_) => unsupported("Dice", MediaDisposition::NoAction),
        M::Venue(_) => unsupported("Venue", MediaDisposition::NoAction),
        M::Poll(_) => unsupported("Poll", MediaDisposition::NotYetSupported),
        M::Contact(_) => unsupported("Contact", MediaDisposition::NotYetSupported),
        M::WebPage(_) => unsupported("WebPage", MediaDisposition::NotYetSupported),
        M::Game(_) => unsupported("Game", MediaDisposition::Ignored),
        M::Invoice(_) => unsupported("Invoice", MediaDisposition::Ignored),
        M::Story(_) => unsupported("Story", MediaDisposition::NotYetSupported),
        M::Unsupported => unsupported("Unsupported", MediaDisposition::Unknown),
        other => {
            let kind = variant_name(other);
            let disposition = if kind.starts_with("Giveaway") || kind.starts_with("Paid") {
                MediaDisposition::Ignored
            } else {
                MediaDisposition::Unknown
            };
            Some(MediaRef::Unsupported { kind, disposition })
        }
    }
}

/// Type letter of the biggest regular size of a photo.
pub fn largest_thumb(sizes: &[tl::enums::PhotoSize]) -> String {
    sizes
        .iter()
        .filter_map(|size| match size {
            tl::enums::PhotoSize::Size(s) => Some((s.w * s.h, s.r#type.clone())),
            tl::enums::PhotoSize::Progressive(s) => Some((s.w * s.h, s.r#type.clone())),
            _ => None,
        })
        .max_by_key(|(area, _)| *area)
        .map(|(_, kind)| kind)
        .unwrap_or_else(|| "x".to_string())
}

fn photo_location(photo: &tl::types::Photo) -> FileLocation {
    let size = photo.sizes.iter().find_map(|s| match s {
        tl::enums::PhotoSize::Size(s) => Some(s.size as i64),
        _ => None,
    });
    FileLocation {
        kind: FileKind::Photo,
        id: photo.id,
        access_hash: photo.access_hash,
        file_reference: photo.file_reference.clone(),
        thumb_size: largest_thumb(&photo.sizes),
        dc_id: photo.dc_id,
        size,
    }
}

pub fn document(doc: &tl::types::Document) -> DocumentRef {
    let mut file_name = None;
    let mut sticker = None;
    for attr in &doc.attributes {
        match attr {
            tl::enums::DocumentAttribute::Filename(f) => file_name = Some(f.file_name.clone()),
            tl::enums::DocumentAttribute::Sticker(s) => {
                let set = match &s.stickerset {
                    tl::enums::InputStickerSet::Id(set) => Some(StickerSetRef {
                        id: set.id,
                        access_hash: set.access_hash,
                    }),
                    _ => None,
                };
                sticker = Some(StickerAttr {
                    emoji: s.alt.clone(),
                    set,
                });
            }
            _ => {}
        }
    }
    DocumentRef {
        location: FileLocation {
            kind: FileKind::Document,
            id: doc.id,
            access_hash: doc.access_hash,
            file_reference: doc.file_reference.clone(),
            thumb_size: String::new(),
            dc_id: doc.dc_id,
            size: Some(doc.size),
        },
        file_name,
        mime_type: doc.mime_type.clone(),
        date: Some(datetime(doc.date)),
        sticker,
        raw_repr: format!("{:?}", doc),
    }
}

pub fn admin_event(channel_id: i64, raw: &tl::enums::ChannelAdminLogEvent) -> RemoteAdminEvent {
    let tl::enums::ChannelAdminLogEvent::Event(event) = raw;
    use tl::enums::ChannelAdminLogEventAction as A;
    let action = match &event.action {
        A::DeleteMessage(d) => message(channel_id, &d.message).map(AdminAction::DeleteMessage),
        A::EditMessage(e) => message(channel_id, &e.prev_message)
            .zip(message(channel_id, &e.new_message))
            .map(|(previous, current)| AdminAction::EditMessage { previous, current }),
        _ => None,
    }
    .unwrap_or_else(|| AdminAction::Other(variant_name(&event.action)));
    RemoteAdminEvent {
        id: event.id,
        date: datetime(event.date),
        user_id: event.user_id,
        action,
        raw_repr: format!("{:?}", event),
    }
}

fn birthday(raw: &tl::enums::Birthday) -> String {
    let tl::enums::Birthday::Birthday(b) = raw;
    match b.year {
        Some(year) => format!("{:04}-{:02}-{:02}", year, b.month, b.day),
        None => format!("--{:02}-{:02}", b.month, b.day),
    }
}

pub fn user(
    schema_layer: i32,
    user_id: i64,
    full: &tl::types::UserFull,
    users: &[tl::enums::User],
) -> User {
    let raw = users.iter().find_map(|u| match u {
        tl::enums::User::User(u) if u.id == user_id => Some(u),
        _ => None,
    });
    let other_usernames = raw
        .and_then(|u| u.usernames.as_ref())
        .map(|names| {
            names
                .iter()
                .map(|n| {
                    let tl::enums::Username::Username(n) = n;
                    n.username.clone()
                })
                .collect()
        })
        .unwrap_or_default();
    User {
        meta: ResourceMeta::capture(
            ResourceKind::User,
            user_id,
            schema_layer,
            format!("{:?}", raw),
            None,
        ),
        bio: full.about.clone(),
        birthday: full.birthday.as_ref().map(birthday),
        is_bot: raw.map(|u| u.bot).unwrap_or(false),
        is_deleted: raw.map(|u| u.deleted).unwrap_or(false),
        first_name: raw.and_then(|u| u.first_name.clone()),
        last_name: raw.and_then(|u| u.last_name.clone()),
        phone: raw.and_then(|u| u.phone.clone()),
        has_premium: raw.map(|u| u.premium).unwrap_or(false),
        username: raw.and_then(|u| u.username.clone()),
        other_usernames,
    }
}

fn input_channel_id(raw: &tl::enums::InputChannel) -> Option<i64> {
    match raw {
        tl::enums::InputChannel::Channel(c) => Some(c.channel_id),
        tl::enums::InputChannel::FromMessage(c) => Some(c.channel_id),
        tl::enums::InputChannel::Empty => None,
    }
}

/// Convert a full chat or channel answer. `None` if `chat_id` is missing
/// from the answer's chat list.
pub fn chat(
    schema_layer: i32,
    chat_id: i64,
    full: &tl::enums::ChatFull,
    chats: &[tl::enums::Chat],
) -> Option<Chat> {
    let (about, participants, linked, migrated_from) = match full {
        tl::enums::ChatFull::Full(f) => (Some(f.about.clone()), None, None, None),
        tl::enums::ChatFull::ChannelFull(f) => (
            Some(f.about.clone()),
            f.participants_count,
            f.linked_chat_id,
            f.migrated_from_chat_id,
        ),
    };
    let meta = |repr: String| {
        ResourceMeta::capture(ResourceKind::Chat, chat_id, schema_layer, repr, None)
    };
    chats.iter().find_map(|c| match c {
        tl::enums::Chat::Chat(c) if c.id == chat_id => Some(Chat {
            meta: meta(format!("{:?}", c)),
            title: c.title.clone(),
            creation_date: Some(datetime(c.date)),
            is_creator: c.creator,
            have_left: c.left,
            broadcast_channel: false,
            participants_count: participants.or(Some(c.participants_count)),
            about: about.clone(),
            username: None,
            migrated_to_chat_id: c.migrated_to.as_ref().and_then(input_channel_id),
            migrated_from_chat_id: None,
            linked_chat_id: None,
        }),
        tl::enums::Chat::Channel(c) if c.id == chat_id => Some(Chat {
            meta: meta(format!("{:?}", c)),
            title: c.title.clone(),
            creation_date: Some(datetime(c.date)),
            is_creator: c.creator,
            have_left: c.left,
            broadcast_channel: c.broadcast,
            participants_count: participants.or(c.participants_count),
            about: about.clone(),
            username: c.username.clone(),
            migrated_to_chat_id: None,
            migrated_from_chat_id: migrated_from,
            linked_chat_id: linked,
        }),
        _ => None,
    })
}

pub fn sticker_set(schema_layer: i32, raw: &tl::enums::StickerSet) -> StickerSet {
    let tl::enums::StickerSet::Set(set) = raw;
    StickerSet {
        meta: ResourceMeta::capture(
            ResourceKind::StickerSet,
            set.id,
            schema_layer,
            format!("{:?}", set),
            None,
        ),
        handle: set.short_name.clone(),
        title: set.title.clone(),
        sticker_count: set.count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(kind: &str, w: i32, h: i32) -> tl::enums::PhotoSize {
        tl::enums::PhotoSize::Size(tl::types::PhotoSize {
            r#type: kind.to_string(),
            w,
            h,
            size: w * h,
        })
    }

    #[test]
    fn largest_photo_size_wins() {
        let sizes = vec![size("s", 90, 90), size("y", 1280, 960), size("m", 320, 240)];
        assert_eq!(largest_thumb(&sizes), "y");
        assert_eq!(largest_thumb(&[]), "x");
    }

    #[test]
    fn peers_map_to_keys() {
        let user = tl::enums::Peer::User(tl::types::PeerUser { user_id: 5 });
        let channel = tl::enums::Peer::Channel(tl::types::PeerChannel { channel_id: 9 });
        assert_eq!(peer_key(&user), PeerKey::User(5));
        assert_eq!(peer_key(&channel), PeerKey::Channel(9));
    }

    #[test]
    fn timestamps_are_utc_seconds() {
        assert_eq!(datetime(0), DateTime::UNIX_EPOCH);
        assert_eq!(datetime(86400).to_rfc3339(), "1970-01-02T00:00:00+00:00");
    }

    #[test]
    fn unknown_media_keeps_its_variant_name() {
        assert_eq!(
            media(&tl::enums::MessageMedia::Unsupported),
            Some(MediaRef::Unsupported {
                kind: "Unsupported".into(),
                disposition: MediaDisposition::Unknown,
            })
        );
        assert_eq!(media(&tl::enums::MessageMedia::Empty), None);
        assert_eq!(variant_name(&Some(3)), "Some");
    }
}
