//! Application-wide constants
//!
//! This module contains all magic numbers and string literals used throughout
//! the application, providing a single source of truth for constant values.

/// Config file location
pub mod config {
    /// Directory under the platform config dir
    pub const APP_DIR: &str = "obs-event-sync";

    /// Settings file name (JSON object, one entry per key)
    pub const FILENAME: &str = "settings.json";
}

/// Persisted setting keys and their defaults
pub mod keys {
    pub const CONTROL_HOST: &str = "control-host";
    pub const CONTROL_PORT: &str = "control-port";
    pub const CONTROL_PASSWORD: &str = "control-password";
    pub const FIELD1_SCENE: &str = "field1-scene";
    pub const FIELD2_SCENE: &str = "field2-scene";
    pub const STREAM_START: &str = "stream-start-timestamp";
    pub const CATALOG_HOST: &str = "catalog-host";
    pub const SELECTED_EVENT: &str = "selected-event";

    pub const DEFAULT_CONTROL_HOST: &str = "localhost";
    pub const DEFAULT_CONTROL_PORT: u16 = 4455;
    pub const DEFAULT_CATALOG_HOST: &str = "localhost";
}

/// obs-websocket v5 protocol constants
pub mod protocol {
    /// RPC version this client speaks
    pub const RPC_VERSION: u32 = 1;

    /// Event subscription bit for output events (StreamStateChanged lives here)
    pub const SUBSCRIBE_OUTPUTS: u32 = 1 << 6;

    /// Frame op codes
    pub mod op {
        pub const HELLO: u8 = 0;
        pub const IDENTIFY: u8 = 1;
        pub const IDENTIFIED: u8 = 2;
        pub const EVENT: u8 = 5;
        pub const REQUEST: u8 = 6;
        pub const REQUEST_RESPONSE: u8 = 7;
    }

    /// WebSocket close codes the connection manager classifies
    pub mod close {
        /// Abnormal closure (no close frame received)
        pub const ABNORMAL: u16 = 1006;

        /// Server rejected the authentication string
        pub const AUTHENTICATION_FAILED: u16 = 4009;

        /// Server does not speak our rpcVersion
        pub const UNSUPPORTED_RPC_VERSION: u16 = 4010;
    }

    /// Request type names
    pub mod request {
        pub const GET_SCENE_LIST: &str = "GetSceneList";
        pub const SET_CURRENT_PROGRAM_SCENE: &str = "SetCurrentProgramScene";
        pub const GET_INPUT_LIST: &str = "GetInputList";
        pub const GET_INPUT_SETTINGS: &str = "GetInputSettings";
        pub const SET_INPUT_SETTINGS: &str = "SetInputSettings";
    }

    /// Event type names
    pub mod event {
        pub const STREAM_STATE_CHANGED: &str = "StreamStateChanged";
    }
}

/// Browser source overlay conventions
pub mod overlay {
    /// Input kind enumerated for event coverage overlays
    pub const INPUT_KIND: &str = "browser_source";

    /// Settings field holding the page URL
    pub const URL_SETTING: &str = "url";

    /// First path segment marking an event-bound overlay (`/event/<code>/...`)
    pub const EVENT_SEGMENT: &str = "event";
}

/// Event catalog REST API
pub mod catalog {
    /// Path prefix for the events collection
    pub const EVENTS_PATH: &str = "api/v1/events";
}
