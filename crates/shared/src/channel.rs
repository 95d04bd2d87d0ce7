//! Channel naming and subscription keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Wire prefix that marks a channel as requiring authorization.
pub const PRIVATE_PREFIX: &str = "private-";

/// Longest wire channel name (prefix included) the transport accepts.
pub const MAX_CHANNEL_NAME_LEN: usize = 164;

/// Whether a channel is open to anyone or needs a signed authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Public,
    Private,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 2] = [ChannelKind::Public, ChannelKind::Private];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Public => "public",
            ChannelKind::Private => "private",
        }
    }

    /// Name of the channel as it travels over the socket.
    pub fn wire_name(&self, channel: &str) -> String {
        match self {
            ChannelKind::Public => channel.to_string(),
            ChannelKind::Private => format!("{PRIVATE_PREFIX}{channel}"),
        }
    }

    /// Split a wire channel name back into its kind and bare name.
    pub fn from_wire(wire: &str) -> (ChannelKind, &str) {
        match wire.strip_prefix(PRIVATE_PREFIX) {
            Some(name) => (ChannelKind::Private, name),
            None => (ChannelKind::Public, wire),
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire channel names may only use the characters the transport accepts:
/// ASCII letters and digits plus `_ - = @ , . ;`.
pub fn validate_channel_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_CHANNEL_NAME_LEN
        && name.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '=' | '@' | ',' | '.' | ';')
        })
}

/// Event names must be non-empty and free of whitespace.
pub fn validate_event_name(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(char::is_whitespace)
}

/// Identity of one `(kind, channel, event)` binding.
///
/// Displayed as `kind:channel:event`, e.g. `private:user.42:notification.sent`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    kind: ChannelKind,
    channel: String,
    event: String,
}

impl SubscriptionKey {
    /// Build a key, returning `None` when either name is invalid.
    ///
    /// A public channel may not carry the `private-` prefix: on the wire it
    /// would be indistinguishable from the private channel.
    pub fn new(kind: ChannelKind, channel: &str, event: &str) -> Option<Self> {
        if channel.is_empty() || !validate_event_name(event) {
            return None;
        }
        if kind == ChannelKind::Public && channel.starts_with(PRIVATE_PREFIX) {
            return None;
        }
        if !validate_channel_name(&kind.wire_name(channel)) {
            return None;
        }
        Some(Self {
            kind,
            channel: channel.to_string(),
            event: event.to_string(),
        })
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn wire_channel(&self) -> String {
        self.kind.wire_name(&self.channel)
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.channel, self.event)
    }
}
