use serde::Deserialize;
use tokio_xmpp::parsers::{
    Element, Jid,
    iq::{Iq, IqType},
    message::{Body, Message, MessageType as WireMessageType},
    muc::{Muc, MucUser, muc::History, user::Status},
    ping::Ping,
    presence::{Presence, Type as PresenceType},
};

use super::XmppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Chat,
    Groupchat,
    Normal,
    Headline,
    Error,
}

impl From<WireMessageType> for MessageType {
    fn from(kind: WireMessageType) -> Self {
        match kind {
            WireMessageType::Chat => MessageType::Chat,
            WireMessageType::Groupchat => MessageType::Groupchat,
            WireMessageType::Normal => MessageType::Normal,
            WireMessageType::Headline => MessageType::Headline,
            WireMessageType::Error => MessageType::Error,
        }
    }
}

impl From<MessageType> for WireMessageType {
    fn from(kind: MessageType) -> Self {
        match kind {
            MessageType::Chat => WireMessageType::Chat,
            MessageType::Groupchat => WireMessageType::Groupchat,
            MessageType::Normal => WireMessageType::Normal,
            MessageType::Headline => WireMessageType::Headline,
            MessageType::Error => WireMessageType::Error,
        }
    }
}

/// How much room history the server should replay on join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryPolicy {
    #[default]
    None,
    /// Only messages from the last N seconds.
    Seconds(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomJoin {
    pub room: String,
    pub nick: String,
    pub password: Option<String>,
    pub history: HistoryPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub to: String,
    pub kind: MessageType,
    pub body: String,
    pub id: String,
}

/// Stanzas the bot sends after the session is established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stanza {
    Message(OutgoingMessage),
    Join(RoomJoin),
}

impl Stanza {
    pub fn to_element(&self) -> Result<Element, XmppError> {
        match self {
            Stanza::Message(message) => {
                let mut stanza = Message::new(Some(parse_address(&message.to)?));
                stanza.type_ = message.kind.into();
                stanza.id = Some(message.id.clone());
                stanza
                    .bodies
                    .insert(String::new(), Body(message.body.clone()));
                Ok(stanza.into())
            }
            Stanza::Join(join) => join_presence(join),
        }
    }
}

fn join_presence(join: &RoomJoin) -> Result<Element, XmppError> {
    let occupant = parse_address(&format!("{}/{}", join.room, join.nick))?;

    let history = match join.history {
        HistoryPolicy::None => History::new().with_maxchars(0),
        HistoryPolicy::Seconds(seconds) => History::new().with_seconds(seconds),
    };
    let mut muc = Muc::new().with_history(history);
    if let Some(password) = &join.password {
        muc = muc.with_password(password.clone());
    }

    Ok(Presence::new(PresenceType::None)
        .with_to(occupant)
        .with_payloads(vec![muc.into()])
        .into())
}

pub(crate) fn parse_address(address: &str) -> Result<Jid, XmppError> {
    address
        .parse()
        .map_err(|err| XmppError::Address(format!("{address}: {err}")))
}

/// Whether `address` is `bare` itself or one of its resources.
pub fn is_from(address: &str, bare: &str) -> bool {
    match address.strip_prefix(bare) {
        Some("") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub from: String,
    pub kind: MessageType,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub from: String,
    pub show: Option<String>,
}

/// Inbound traffic as seen by the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Chat(ChatMessage),
    Presence(PresenceUpdate),
    /// Anything else, identified by its element name.
    Other(String),
}

impl Event {
    pub fn classify(element: Element) -> Self {
        let from = element.attr("from").unwrap_or_default().to_string();
        match element.name() {
            "message" => match Message::try_from(element) {
                Ok(message) => match message.bodies.into_values().next() {
                    Some(Body(body)) => Event::Chat(ChatMessage {
                        from,
                        kind: message.type_.into(),
                        body,
                    }),
                    None => Event::Other("message".to_string()),
                },
                Err(_) => Event::Other("message".to_string()),
            },
            "presence" => Event::Presence(PresenceUpdate {
                from,
                show: element
                    .children()
                    .find(|child| child.name() == "show")
                    .map(|show| show.text()),
            }),
            other => Event::Other(other.to_string()),
        }
    }
}

/// Answer for an XEP-0199 ping, if `element` is one.
pub fn ping_reply(element: &Element) -> Option<Element> {
    if element.name() != "iq" {
        return None;
    }
    let iq = Iq::try_from(element.clone()).ok()?;
    let IqType::Get(payload) = &iq.payload else {
        return None;
    };
    Ping::try_from(payload.clone()).ok()?;

    Some(
        Iq {
            from: None,
            to: iq.from,
            id: iq.id,
            payload: IqType::Result(None),
        }
        .into(),
    )
}

/// The room's answer to our join, if `element` is one.
///
/// A self-presence (status 110) accepts the join; an error presence from the
/// room refuses it with the error's defined condition.
pub fn join_response(element: &Element, room: &str) -> Option<Result<(), String>> {
    if element.name() != "presence" || !is_from(element.attr("from").unwrap_or_default(), room) {
        return None;
    }
    let presence = Presence::try_from(element.clone()).ok()?;

    if presence.type_ == PresenceType::Error {
        let condition = element
            .children()
            .find(|child| child.name() == "error")
            .and_then(|error| error.children().next())
            .map(|condition| condition.name().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        return Some(Err(condition));
    }

    let own = presence
        .payloads
        .into_iter()
        .filter_map(|payload| MucUser::try_from(payload).ok())
        .any(|user| user.status.contains(&Status::SelfPresence));
    own.then_some(Ok(()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(xml: &str) -> Element {
        xml.parse().expect("well-formed stanza")
    }

    fn child<'a>(element: &'a Element, name: &str) -> Option<&'a Element> {
        element.children().find(|child| child.name() == name)
    }

    #[test]
    fn protected_join_carries_password_and_history() {
        let join = Stanza::Join(RoomJoin {
            room: "room@muc.example.org".into(),
            nick: "relay".into(),
            password: Some("secret".into()),
            history: HistoryPolicy::Seconds(0),
        });
        let element = join.to_element().expect("valid occupant address");

        assert_eq!(element.name(), "presence");
        assert_eq!(element.attr("to"), Some("room@muc.example.org/relay"));
        let muc = child(&element, "x").expect("muc payload");
        assert_eq!(muc.ns(), "http://jabber.org/protocol/muc");
        assert_eq!(child(muc, "password").map(Element::text).as_deref(), Some("secret"));
        assert_eq!(child(muc, "history").and_then(|h| h.attr("seconds")), Some("0"));
    }

    #[test]
    fn open_join_requests_no_history() {
        let join = Stanza::Join(RoomJoin {
            room: "room@muc.example.org".into(),
            nick: "relay".into(),
            password: None,
            history: HistoryPolicy::None,
        });
        let element = join.to_element().expect("valid occupant address");
        let muc = child(&element, "x").expect("muc payload");

        assert!(child(muc, "password").is_none());
        assert_eq!(child(muc, "history").and_then(|h| h.attr("maxchars")), Some("0"));
    }

    #[test]
    fn message_carries_type_id_and_body() {
        let message = Stanza::Message(OutgoingMessage {
            to: "a@example.org".into(),
            kind: MessageType::Chat,
            body: "hello".into(),
            id: "m1".into(),
        });
        let element = message.to_element().expect("valid address");

        assert_eq!(element.attr("to"), Some("a@example.org"));
        assert_eq!(element.attr("type"), Some("chat"));
        assert_eq!(element.attr("id"), Some("m1"));
        assert_eq!(child(&element, "body").map(Element::text).as_deref(), Some("hello"));
    }

    #[test]
    fn invalid_destination_is_rejected() {
        let message = Stanza::Message(OutgoingMessage {
            to: "@broken".into(),
            kind: MessageType::Chat,
            body: "hello".into(),
            id: "m1".into(),
        });
        assert!(matches!(message.to_element(), Err(XmppError::Address(_))));
    }

    #[test]
    fn classifies_inbound_stanzas() {
        let chat = parse(
            "<message xmlns='jabber:client' from='room@muc.example.org/alice' type='groupchat'>\
             <body>hi</body></message>",
        );
        assert_eq!(
            Event::classify(chat),
            Event::Chat(ChatMessage {
                from: "room@muc.example.org/alice".into(),
                kind: MessageType::Groupchat,
                body: "hi".into(),
            })
        );

        let typing = parse("<message xmlns='jabber:client' from='a@example.org'/>");
        assert_eq!(Event::classify(typing), Event::Other("message".into()));

        let presence = parse(
            "<presence xmlns='jabber:client' from='a@example.org/phone'><show>away</show></presence>",
        );
        assert_eq!(
            Event::classify(presence),
            Event::Presence(PresenceUpdate {
                from: "a@example.org/phone".into(),
                show: Some("away".into()),
            })
        );
    }

    #[test]
    fn answers_pings_only() {
        let ping = parse(
            "<iq xmlns='jabber:client' type='get' from='example.org' id='p1'>\
             <ping xmlns='urn:xmpp:ping'/></iq>",
        );
        let reply = ping_reply(&ping).expect("ping gets a reply");
        assert_eq!(reply.attr("type"), Some("result"));
        assert_eq!(reply.attr("to"), Some("example.org"));
        assert_eq!(reply.attr("id"), Some("p1"));

        let version = parse(
            "<iq xmlns='jabber:client' type='get' id='v1'>\
             <query xmlns='jabber:iq:version'/></iq>",
        );
        assert!(ping_reply(&version).is_none());
    }

    #[test]
    fn self_presence_accepts_the_join() {
        let own = parse(
            "<presence xmlns='jabber:client' from='room@muc.example.org/relay'>\
             <x xmlns='http://jabber.org/protocol/muc#user'>\
             <item affiliation='none' role='participant'/><status code='110'/></x></presence>",
        );
        assert_eq!(join_response(&own, "room@muc.example.org"), Some(Ok(())));

        let other_occupant = parse(
            "<presence xmlns='jabber:client' from='room@muc.example.org/alice'>\
             <x xmlns='http://jabber.org/protocol/muc#user'>\
             <item affiliation='none' role='participant'/></x></presence>",
        );
        assert_eq!(join_response(&other_occupant, "room@muc.example.org"), None);
        assert_eq!(join_response(&own, "other@muc.example.org"), None);
    }

    #[test]
    fn error_presence_refuses_the_join() {
        let refused = parse(
            "<presence xmlns='jabber:client' from='room@muc.example.org/relay' type='error'>\
             <error type='auth'><not-authorized xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/>\
             </error></presence>",
        );
        assert_eq!(
            join_response(&refused, "room@muc.example.org"),
            Some(Err("not-authorized".to_string()))
        );
    }

    #[test]
    fn is_from_respects_resource_boundary() {
        assert!(is_from("room@muc.example.org", "room@muc.example.org"));
        assert!(is_from("room@muc.example.org/alice", "room@muc.example.org"));
        assert!(!is_from("room@muc.example.org.evil/alice", "room@muc.example.org"));
    }
}
