//! Standard request, descriptor type and feature selector codes (USB 2.0 §9.4)

// bRequest values
pub const GET_STATUS: u8 = 0x00;
pub const CLEAR_FEATURE: u8 = 0x01;
pub const SET_FEATURE: u8 = 0x03;
pub const SET_ADDRESS: u8 = 0x05;
pub const GET_DESCRIPTOR: u8 = 0x06;
pub const SET_DESCRIPTOR: u8 = 0x07;
pub const GET_CONFIGURATION: u8 = 0x08;
pub const SET_CONFIGURATION: u8 = 0x09;
pub const GET_INTERFACE: u8 = 0x0a;
pub const SET_INTERFACE: u8 = 0x0b;
pub const SYNCH_FRAME: u8 = 0x0c;

// Descriptor types (high byte of wValue for GET_DESCRIPTOR)
pub const DESCRIPTOR_DEVICE: u8 = 0x01;
pub const DESCRIPTOR_CONFIGURATION: u8 = 0x02;
pub const DESCRIPTOR_STRING: u8 = 0x03;
pub const DESCRIPTOR_INTERFACE: u8 = 0x04;
pub const DESCRIPTOR_ENDPOINT: u8 = 0x05;
pub const DESCRIPTOR_DEVICE_QUALIFIER: u8 = 0x06;
pub const DESCRIPTOR_BOS: u8 = 0x0f;
pub const DESCRIPTOR_HUB: u8 = 0x29;

// Feature selectors
pub const FEATURE_ENDPOINT_HALT: u16 = 0x00;
pub const FEATURE_DEVICE_REMOTE_WAKEUP: u16 = 0x01;
pub const FEATURE_TEST_MODE: u16 = 0x02;

// GET_STATUS bits for a device recipient
pub const STATUS_SELF_POWERED: u16 = 0x0001;
pub const STATUS_REMOTE_WAKEUP: u16 = 0x0002;

/// bDeviceClass of a hub
pub const CLASS_HUB: u8 = 0x09;

/// US English, the language id most devices report first
pub const LANGID_EN_US: u16 = 0x0409;

/// Human-readable name of a standard bRequest, for logging
pub fn request_name(request: u8) -> &'static str {
    match request {
        GET_STATUS => "GET_STATUS",
        CLEAR_FEATURE => "CLEAR_FEATURE",
        SET_FEATURE => "SET_FEATURE",
        SET_ADDRESS => "SET_ADDRESS",
        GET_DESCRIPTOR => "GET_DESCRIPTOR",
        SET_DESCRIPTOR => "SET_DESCRIPTOR",
        GET_CONFIGURATION => "GET_CONFIGURATION",
        SET_CONFIGURATION => "SET_CONFIGURATION",
        GET_INTERFACE => "GET_INTERFACE",
        SET_INTERFACE => "SET_INTERFACE",
        SYNCH_FRAME => "SYNCH_FRAME",
        _ => "NON_STANDARD",
    }
}
