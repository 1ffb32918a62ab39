//! HTTP/2 SETTINGS per browser family.
//!
//! The same values configure both the HTTP/2 origin transport and the
//! HTTP/2 client that carries CONNECT tunnels to a proxy, so both present
//! the browser identity implied by the user agent.

use hyper_util::rt::TokioExecutor;

/// Browser family derived from a user agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Navigator {
    #[default]
    Chrome,
    Firefox,
    Safari,
}

impl Navigator {
    /// Picks the family from a user-agent string. Unknown agents are
    /// treated as Chrome.
    pub fn from_user_agent(user_agent: &str) -> Self {
        if user_agent.contains("Firefox") {
            Navigator::Firefox
        } else if user_agent.contains("Chrome") || user_agent.contains("Chromium") {
            Navigator::Chrome
        } else if user_agent.contains("Safari") {
            Navigator::Safari
        } else {
            Navigator::Chrome
        }
    }

    pub fn h2_settings(self) -> H2Settings {
        match self {
            Navigator::Chrome => H2Settings::chrome(),
            Navigator::Firefox => H2Settings::firefox(),
            Navigator::Safari => H2Settings::safari(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Navigator::Chrome => "chrome",
            Navigator::Firefox => "firefox",
            Navigator::Safari => "safari",
        }
    }
}

/// HTTP/2 SETTINGS configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H2Settings {
    /// SETTINGS_HEADER_TABLE_SIZE (0x1)
    pub header_table_size: u32,
    /// SETTINGS_ENABLE_PUSH (0x2)
    pub enable_push: bool,
    /// SETTINGS_INITIAL_WINDOW_SIZE (0x4)
    pub initial_window_size: u32,
    /// Connection-level window, announced via WINDOW_UPDATE
    pub initial_connection_window_size: u32,
    /// SETTINGS_MAX_FRAME_SIZE (0x5)
    pub max_frame_size: u32,
    /// SETTINGS_MAX_HEADER_LIST_SIZE (0x6), 0 means not sent
    pub max_header_list_size: u32,
}

impl Default for H2Settings {
    fn default() -> Self {
        Self::chrome()
    }
}

impl H2Settings {
    pub fn chrome() -> Self {
        Self {
            header_table_size: 65536,
            enable_push: false,
            initial_window_size: 6291456,
            initial_connection_window_size: 15728640,
            max_frame_size: 16384,
            max_header_list_size: 262144,
        }
    }

    pub fn firefox() -> Self {
        Self {
            header_table_size: 65536,
            enable_push: false,
            initial_window_size: 131072,
            initial_connection_window_size: 12582912,
            max_frame_size: 16384,
            max_header_list_size: 65536,
        }
    }

    pub fn safari() -> Self {
        Self {
            header_table_size: 4096,
            enable_push: false,
            initial_window_size: 4194304,
            initial_connection_window_size: 10485760,
            max_frame_size: 16384,
            max_header_list_size: 0,
        }
    }

    /// Configures the CONNECT tunnel client.
    pub fn apply_to_tunnel(&self, builder: &mut http2::client::Builder) {
        builder
            .header_table_size(self.header_table_size)
            .enable_push(self.enable_push)
            .initial_window_size(self.initial_window_size)
            .initial_connection_window_size(self.initial_connection_window_size)
            .max_frame_size(self.max_frame_size);
        if self.max_header_list_size > 0 {
            builder.max_header_list_size(self.max_header_list_size);
        }
    }

    /// Configures the origin HTTP/2 transport.
    pub fn apply_to_transport(
        &self,
        builder: &mut hyper::client::conn::http2::Builder<TokioExecutor>,
    ) {
        builder
            .initial_stream_window_size(self.initial_window_size)
            .initial_connection_window_size(self.initial_connection_window_size)
            .max_frame_size(self.max_frame_size);
        if self.max_header_list_size > 0 {
            builder.max_header_list_size(self.max_header_list_size);
        }
    }
}
