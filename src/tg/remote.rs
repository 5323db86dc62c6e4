//! [`RemoteSource`] backed by a live grammers client.

use super::convert;
use crate::archive::remote::{FetchedStickerSet, LiveEvent, RemoteSource};
use crate::error::{classify_rpc_name, FetchError, RpcClass};
use crate::model::{
    Chat, ChatInfo, ChatKind, DocumentRef, FileKind, FileLocation, PeerKey, RemoteAdminEvent,
    RemoteMessage, StickerSetRef, User,
};
use async_trait::async_trait;
use grammers_client::types::Peer;
use grammers_client::{Client, Update, UpdatesConfiguration};
use grammers_mtsender::InvocationError;
use grammers_session::defs::{PeerId, PeerRef};
use grammers_session::storages::SqliteSession;
use grammers_session::updates::UpdatesLike;
use grammers_session::Session;
use grammers_tl_types as tl;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

const DOWNLOAD_CHUNK: i32 = 512 * 1024;

fn classify(err: InvocationError, what: impl Into<String>) -> FetchError {
    let what = what.into();
    let class = match &err {
        InvocationError::Rpc(rpc) => classify_rpc_name(&rpc.name),
        _ => None,
    };
    match class {
        Some(RpcClass::Inaccessible) => FetchError::Inaccessible(what),
        Some(RpcClass::ReferenceExpired) => FetchError::ReferenceExpired(what),
        Some(RpcClass::SetInvalid) => FetchError::SetInvalid(what),
        None => FetchError::Other(
            anyhow::Error::new(err).context(format!("Telegram API call failed: {}", what)),
        ),
    }
}

pub struct TgRemote {
    client: Client,
    session: Arc<SqliteSession>,
    /// Access hashes seen in answers, so peers found in history can be
    /// addressed later.
    hashes: Mutex<HashMap<PeerKey, i64>>,
    dialogs: Mutex<HashMap<i64, (ChatInfo, tl::enums::InputPeer)>>,
}

impl TgRemote {
    pub fn new(client: Client, session: Arc<SqliteSession>) -> Arc<Self> {
        Arc::new(Self {
            client,
            session,
            hashes: Mutex::new(HashMap::new()),
            dialogs: Mutex::new(HashMap::new()),
        })
    }

    fn remember(&self, users: &[tl::enums::User], chats: &[tl::enums::Chat]) {
        let mut hashes = self.hashes.lock();
        for user in users {
            if let tl::enums::User::User(u) = user {
                if let Some(hash) = u.access_hash {
                    hashes.insert(PeerKey::User(u.id), hash);
                }
            }
        }
        for chat in chats {
            if let tl::enums::Chat::Channel(c) = chat {
                if let Some(hash) = c.access_hash {
                    hashes.insert(PeerKey::Channel(c.id), hash);
                }
            }
        }
    }

    fn input_peer(&self, peer: PeerKey) -> Result<tl::enums::InputPeer, FetchError> {
        if let PeerKey::Chat(chat_id) = peer {
            return Ok(tl::enums::InputPeer::Chat(tl::types::InputPeerChat { chat_id }));
        }
        if let Some(hash) = self.hashes.lock().get(&peer).copied() {
            return Ok(match peer {
                PeerKey::User(user_id) => tl::enums::InputPeer::User(tl::types::InputPeerUser {
                    user_id,
                    access_hash: hash,
                }),
                PeerKey::Channel(channel_id) | PeerKey::Chat(channel_id) => {
                    tl::enums::InputPeer::Channel(tl::types::InputPeerChannel {
                        channel_id,
                        access_hash: hash,
                    })
                }
            });
        }
        let id = match peer {
            PeerKey::User(id) => PeerId::user(id),
            PeerKey::Channel(id) | PeerKey::Chat(id) => PeerId::channel(id),
        };
        match self.session.peer(id) {
            Some(info) => Ok(PeerRef {
                id,
                auth: info.auth(),
            }
            .into()),
            None => Err(FetchError::Inaccessible(format!(
                "{} (no access hash known)",
                peer
            ))),
        }
    }

    fn input_user(&self, user_id: i64) -> Result<tl::enums::InputUser, FetchError> {
        match self.input_peer(PeerKey::User(user_id))? {
            tl::enums::InputPeer::User(u) => Ok(tl::enums::InputUser::User(tl::types::InputUser {
                user_id: u.user_id,
                access_hash: u.access_hash,
            })),
            _ => Err(FetchError::Inaccessible(format!("user {}", user_id))),
        }
    }

    fn input_channel(&self, channel_id: i64) -> Result<tl::enums::InputChannel, FetchError> {
        match self.input_peer(PeerKey::Channel(channel_id))? {
            tl::enums::InputPeer::Channel(c) => {
                Ok(tl::enums::InputChannel::Channel(tl::types::InputChannel {
                    channel_id: c.channel_id,
                    access_hash: c.access_hash,
                }))
            }
            _ => Err(FetchError::Inaccessible(format!("channel {}", channel_id))),
        }
    }

    /// Load every dialog of the account into the chat lookup table.
    async fn load_dialogs(&self) -> Result<(), FetchError> {
        let mut dialogs = self.client.iter_dialogs();
        let mut found = Vec::new();
        loop {
            let dialog = match dialogs.next().await {
                Ok(Some(dialog)) => dialog,
                Ok(None) => break,
                Err(e) => return Err(classify(e, "dialog listing")),
            };
            found.push(dialog_info(dialog.peer()));
        }
        log::debug!("Loaded {} dialogs", found.len());
        let mut table = self.dialogs.lock();
        for (info, input) in found {
            table.insert(info.chat_id, (info, input));
        }
        Ok(())
    }

    async fn resolve_chat(
        &self,
        chat_id: i64,
    ) -> Result<(ChatInfo, tl::enums::InputPeer), FetchError> {
        let cached = self.dialogs.lock().get(&chat_id).cloned();
        if let Some(found) = cached {
            return Ok(found);
        }
        self.load_dialogs().await?;
        self.dialogs
            .lock()
            .get(&chat_id)
            .cloned()
            .ok_or_else(|| FetchError::Inaccessible(format!("chat {} (not in dialogs)", chat_id)))
    }

    /// Turn raw updates into [`LiveEvent`]s on a bounded channel. The
    /// channel closes when the update stream fails.
    pub fn forward_updates(
        &self,
        updates: mpsc::UnboundedReceiver<UpdatesLike>,
    ) -> mpsc::Receiver<LiveEvent> {
        let (tx, rx) = mpsc::channel(256);
        let mut stream = self
            .client
            .stream_updates(updates, UpdatesConfiguration::default());
        tokio::spawn(async move {
            loop {
                let update = match stream.next().await {
                    Ok(update) => update,
                    Err(e) => {
                        log::error!("Update stream ended: {}", e);
                        break;
                    }
                };
                let Some(event) = live_event(&update) else {
                    continue;
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        rx
    }
}

fn dialog_info(peer: &Peer) -> (ChatInfo, tl::enums::InputPeer) {
    let input: tl::enums::InputPeer = PeerRef::from(peer).into();
    let chat_id = peer.id().bare_id();
    let (key, kind, title) = match peer {
        Peer::User(u) => (PeerKey::User(chat_id), ChatKind::Private, u.full_name()),
        Peer::Group(g) => {
            let title = g.title().map(|s| s.to_string()).unwrap_or_default();
            match input {
                tl::enums::InputPeer::Channel(_) => {
                    (PeerKey::Channel(chat_id), ChatKind::Supergroup, title)
                }
                _ => (PeerKey::Chat(chat_id), ChatKind::BasicGroup, title),
            }
        }
        Peer::Channel(c) => {
            let kind = if c.raw.megagroup {
                ChatKind::Supergroup
            } else {
                ChatKind::Channel
            };
            (PeerKey::Channel(chat_id), kind, c.title().to_string())
        }
    };
    (
        ChatInfo {
            chat_id,
            peer: key,
            kind,
            title,
        },
        input,
    )
}

fn live_event(update: &Update) -> Option<LiveEvent> {
    match update {
        // `msg.raw` is the update envelope; the message itself sits behind
        // the deref.
        Update::NewMessage(msg) => live_message(msg.peer_id().bare_id(), &(**msg).raw, false),
        Update::MessageEdited(msg) => live_message(msg.peer_id().bare_id(), &(**msg).raw, true),
        Update::MessageDeleted(deletion) => match &deletion.raw {
            tl::enums::Update::DeleteMessages(d) => Some(LiveEvent::MessagesDeleted {
                chat_id: None,
                message_ids: d.messages.clone(),
            }),
            tl::enums::Update::DeleteChannelMessages(d) => Some(LiveEvent::MessagesDeleted {
                chat_id: Some(d.channel_id),
                message_ids: d.messages.clone(),
            }),
            _ => None,
        },
        _ => None,
    }
}

fn live_message(chat_id: i64, raw: &tl::enums::Message, edited: bool) -> Option<LiveEvent> {
    let msg = convert::message(chat_id, raw)?;
    Some(if edited {
        LiveEvent::MessageEdited(msg)
    } else {
        LiveEvent::NewMessage(msg)
    })
}

fn history_messages(
    raw: tl::enums::messages::Messages,
) -> (Vec<tl::enums::Message>, Vec<tl::enums::User>, Vec<tl::enums::Chat>) {
    match raw {
        tl::enums::messages::Messages::Messages(m) => (m.messages, m.users, m.chats),
        tl::enums::messages::Messages::Slice(m) => (m.messages, m.users, m.chats),
        tl::enums::messages::Messages::ChannelMessages(m) => (m.messages, m.users, m.chats),
        tl::enums::messages::Messages::NotModified(_) => (Vec::new(), Vec::new(), Vec::new()),
    }
}

fn file_location(location: &FileLocation) -> tl::enums::InputFileLocation {
    match location.kind {
        FileKind::Photo => {
            tl::enums::InputFileLocation::InputPhotoFileLocation(tl::types::InputPhotoFileLocation {
                id: location.id,
                access_hash: location.access_hash,
                file_reference: location.file_reference.clone(),
                thumb_size: location.thumb_size.clone(),
            })
        }
        FileKind::Document => tl::enums::InputFileLocation::InputDocumentFileLocation(
            tl::types::InputDocumentFileLocation {
                id: location.id,
                access_hash: location.access_hash,
                file_reference: location.file_reference.clone(),
                thumb_size: location.thumb_size.clone(),
            },
        ),
    }
}

#[async_trait]
impl RemoteSource for TgRemote {
    fn schema_layer(&self) -> i32 {
        tl::LAYER
    }

    async fn chat_info(&self, chat_id: i64) -> Result<ChatInfo, FetchError> {
        self.resolve_chat(chat_id).await.map(|(info, _)| info)
    }

    async fn history_page(
        &self,
        chat_id: i64,
        offset_id: i32,
        limit: usize,
    ) -> Result<Vec<RemoteMessage>, FetchError> {
        let (_, peer) = self.resolve_chat(chat_id).await?;
        let request = tl::functions::messages::GetHistory {
            peer,
            offset_id,
            offset_date: 0,
            add_offset: 0,
            limit: limit as i32,
            max_id: 0,
            min_id: 0,
            hash: 0,
        };
        let result = self
            .client
            .invoke(&request)
            .await
            .map_err(|e| classify(e, format!("history of chat {}", chat_id)))?;
        let (messages, users, chats) = history_messages(result);
        self.remember(&users, &chats);
        Ok(messages
            .iter()
            .filter_map(|m| convert::message(chat_id, m))
            .collect())
    }

    async fn admin_log_page(
        &self,
        chat_id: i64,
        max_id: i64,
        limit: usize,
    ) -> Result<Vec<RemoteAdminEvent>, FetchError> {
        let request = tl::functions::channels::GetAdminLog {
            channel: self.input_channel(chat_id)?,
            q: String::new(),
            events_filter: None,
            admins: None,
            max_id,
            min_id: 0,
            limit: limit as i32,
        };
        let result = self
            .client
            .invoke(&request)
            .await
            .map_err(|e| classify(e, format!("admin log of chat {}", chat_id)))?;
        let tl::enums::channels::AdminLogResults::Results(results) = result;
        self.remember(&results.users, &results.chats);
        Ok(results
            .events
            .iter()
            .map(|e| convert::admin_event(chat_id, e))
            .collect())
    }

    async fn full_user(&self, user_id: i64) -> Result<User, FetchError> {
        let request = tl::functions::users::GetFullUser {
            id: self.input_user(user_id)?,
        };
        let result = self
            .client
            .invoke(&request)
            .await
            .map_err(|e| classify(e, format!("user {}", user_id)))?;
        let tl::types::users::UserFull {
            full_user,
            users,
            chats,
            ..
        } = result.into();
        self.remember(&users, &chats);
        let tl::enums::UserFull::Full(full) = full_user;
        Ok(convert::user(self.schema_layer(), user_id, &full, &users))
    }

    async fn full_chat(&self, chat_id: i64) -> Result<Chat, FetchError> {
        let request = tl::functions::messages::GetFullChat { chat_id };
        let result = self
            .client
            .invoke(&request)
            .await
            .map_err(|e| classify(e, format!("chat {}", chat_id)))?;
        let tl::types::messages::ChatFull {
            full_chat,
            chats,
            users,
            ..
        } = result.into();
        self.remember(&users, &chats);
        convert::chat(self.schema_layer(), chat_id, &full_chat, &chats)
            .ok_or_else(|| FetchError::Inaccessible(format!("chat {} (missing from answer)", chat_id)))
    }

    async fn full_channel(&self, channel_id: i64) -> Result<Chat, FetchError> {
        let request = tl::functions::channels::GetFullChannel {
            channel: self.input_channel(channel_id)?,
        };
        let result = self
            .client
            .invoke(&request)
            .await
            .map_err(|e| classify(e, format!("channel {}", channel_id)))?;
        let tl::types::messages::ChatFull {
            full_chat,
            chats,
            users,
            ..
        } = result.into();
        self.remember(&users, &chats);
        convert::chat(self.schema_layer(), channel_id, &full_chat, &chats).ok_or_else(|| {
            FetchError::Inaccessible(format!("channel {} (missing from answer)", channel_id))
        })
    }

    async fn sticker_set(&self, set: StickerSetRef) -> Result<FetchedStickerSet, FetchError> {
        let request = tl::functions::messages::GetStickerSet {
            stickerset: tl::enums::InputStickerSet::Id(tl::types::InputStickerSetId {
                id: set.id,
                access_hash: set.access_hash,
            }),
            hash: 0,
        };
        let result = self
            .client
            .invoke(&request)
            .await
            .map_err(|e| classify(e, format!("sticker set {}", set.id)))?;
        let tl::enums::messages::StickerSet::Set(fetched) = result else {
            return Err(FetchError::Other(anyhow::anyhow!(
                "sticker set {} not modified (unexpected)",
                set.id
            )));
        };
        let documents: Vec<DocumentRef> = fetched
            .documents
            .iter()
            .filter_map(|d| match d {
                tl::enums::Document::Document(doc) => Some(convert::document(doc)),
                tl::enums::Document::Empty(_) => None,
            })
            .collect();
        Ok(FetchedStickerSet {
            set: convert::sticker_set(self.schema_layer(), &fetched.set),
            documents,
        })
    }

    async fn download(&self, location: &FileLocation, dest: &Path) -> Result<(), FetchError> {
        let what = format!("file {}", location.id);
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| {
                FetchError::Other(anyhow::Error::new(e).context(format!("create {}", dest.display())))
            })?;
        let mut offset: i64 = 0;
        loop {
            let request = tl::functions::upload::GetFile {
                precise: false,
                cdn_supported: false,
                location: file_location(location),
                offset,
                limit: DOWNLOAD_CHUNK,
            };
            let result = self
                .client
                .invoke_in_dc(location.dc_id, &request)
                .await
                .map_err(|e| classify(e, what.clone()))?;
            let bytes = match result {
                tl::enums::upload::File::File(f) => f.bytes,
                tl::enums::upload::File::CdnRedirect(_) => {
                    return Err(FetchError::Other(anyhow::anyhow!(
                        "{} is served from a CDN, which is not supported",
                        what
                    )))
                }
            };
            file.write_all(&bytes)
                .await
                .map_err(|e| FetchError::Other(e.into()))?;
            offset += bytes.len() as i64;
            if bytes.len() < DOWNLOAD_CHUNK as usize {
                break;
            }
        }
        file.flush().await.map_err(|e| FetchError::Other(e.into()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unclassified_rpc_errors_stay_unclassified() {
        let err = classify(InvocationError::Dropped, "history of chat 1");
        assert!(!err.is_classified());
        assert!(format!("{:#}", anyhow::Error::from(err)).contains("history of chat 1"));
    }

    fn service_message(id: i32) -> tl::enums::Message {
        tl::enums::Message::Service(tl::types::MessageService {
            out: false,
            mentioned: false,
            media_unread: false,
            reactions_are_possible: false,
            silent: false,
            post: false,
            legacy: false,
            id,
            from_id: Some(tl::enums::Peer::User(tl::types::PeerUser { user_id: 7 })),
            peer_id: tl::enums::Peer::Channel(tl::types::PeerChannel { channel_id: 9 }),
            saved_peer_id: None,
            reply_to: None,
            date: 86400,
            action: tl::enums::MessageAction::Empty,
            reactions: None,
            ttl_period: None,
        })
    }

    #[test]
    fn live_messages_keep_new_and_edited_apart() {
        let raw = service_message(42);
        match live_message(9, &raw, false) {
            Some(LiveEvent::NewMessage(msg)) => {
                assert_eq!((msg.id, msg.chat_id), (42, 9));
                assert_eq!(msg.sender, Some(PeerKey::User(7)));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            live_message(9, &raw, true),
            Some(LiveEvent::MessageEdited(msg)) if msg.id == 42
        ));

        let empty = tl::enums::Message::Empty(tl::types::MessageEmpty {
            id: 1,
            peer_id: None,
        });
        assert!(live_message(9, &empty, false).is_none());
    }
}
