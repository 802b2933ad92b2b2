//! Standard Request Encoding Tests
//!
//! Property tests for the standard request constructors: bmRequestType bits,
//! wValue/wIndex packing and target validation.
//!
//! Run with: `cargo test -p host --test request_tests`

use host::usb::request;
use protocol::requests::{CLEAR_FEATURE, GET_DESCRIPTOR, SET_FEATURE};
use protocol::{Direction, Recipient, ValidationError};
use proptest::prelude::*;

fn addressable_recipient() -> impl Strategy<Value = Recipient> {
    prop_oneof![
        Just(Recipient::Device),
        Just(Recipient::Interface),
        Just(Recipient::Endpoint),
    ]
}

// ============================================================================
// Feature Request Properties
// ============================================================================

mod feature_requests {
    use super::*;

    proptest! {
        #[test]
        fn clear_feature_encodes_recipient(
            recipient in addressable_recipient(),
            feature in any::<u16>(),
            target in any::<u16>(),
        ) {
            let result = request::clear_feature(recipient, feature, target);

            if recipient == Recipient::Device && target != 0 {
                prop_assert_eq!(
                    result.unwrap_err(),
                    ValidationError::NonZeroDeviceTarget { request: CLEAR_FEATURE, target }
                );
            } else {
                let setup = result.unwrap().setup().unwrap();
                prop_assert_eq!(setup.request_type, recipient.bits());
                prop_assert_eq!(setup.direction(), Direction::HostToDevice);
                prop_assert_eq!(setup.request, CLEAR_FEATURE);
                prop_assert_eq!(setup.value, feature);
                prop_assert_eq!(setup.index, target);
                prop_assert_eq!(setup.length, 0);
            }
        }

        #[test]
        fn set_feature_matches_clear_feature(
            recipient in addressable_recipient(),
            feature in any::<u16>(),
            target in 0u16..4,
        ) {
            let set = request::set_feature(recipient, feature, target);
            let clear = request::clear_feature(recipient, feature, target);

            prop_assert_eq!(set.is_ok(), clear.is_ok());
            if let (Ok(set), Ok(clear)) = (set, clear) {
                let (set, clear) = (set.setup().unwrap(), clear.setup().unwrap());
                prop_assert_eq!(set.request, SET_FEATURE);
                prop_assert_eq!(set.request_type, clear.request_type);
                prop_assert_eq!(set.value, clear.value);
                prop_assert_eq!(set.index, clear.index);
            }
        }

        #[test]
        fn other_recipient_rejected(feature in any::<u16>(), target in any::<u16>()) {
            prop_assert_eq!(
                request::clear_feature(Recipient::Other, feature, target).unwrap_err(),
                ValidationError::InvalidRecipient(Recipient::Other.bits())
            );
            prop_assert!(request::get_status(Recipient::Other, target).is_err());
        }
    }
}

// ============================================================================
// Descriptor Request Properties
// ============================================================================

mod descriptor_requests {
    use super::*;

    proptest! {
        #[test]
        fn get_descriptor_packs_value_and_index(
            descriptor_type in any::<u8>(),
            index in any::<u8>(),
            langid in any::<u16>(),
            length in 0usize..=1024,
        ) {
            let irp = request::get_descriptor(descriptor_type, index, langid, length).unwrap();
            let setup = irp.setup().unwrap();

            prop_assert_eq!(setup.request, GET_DESCRIPTOR);
            prop_assert_eq!(setup.request_type, 0x80);
            prop_assert_eq!(setup.value, (descriptor_type as u16) << 8 | index as u16);
            prop_assert_eq!(setup.index, langid);
            prop_assert_eq!(setup.length as usize, length);
            prop_assert_eq!(irp.length(), length);
            prop_assert!(irp.accept_short_packet());
        }

        #[test]
        fn get_descriptor_length_bounded(extra in 1usize..1024) {
            let length = u16::MAX as usize + extra;
            prop_assert_eq!(
                request::get_descriptor(0x01, 0, 0, length).unwrap_err(),
                ValidationError::LengthTooLarge(length)
            );
        }

        #[test]
        fn set_descriptor_carries_data(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let irp = request::set_descriptor(0x03, 1, 0x0409, data.clone()).unwrap();
            let setup = irp.setup().unwrap();

            prop_assert_eq!(setup.direction(), Direction::HostToDevice);
            prop_assert_eq!(setup.length as usize, data.len());
            prop_assert_eq!(irp.buffer(), data);
        }
    }
}

// ============================================================================
// Fixed-Length Requests
// ============================================================================

mod fixed_length {
    use super::*;

    #[test]
    fn test_exact_length_requests_refuse_short_packets() {
        let irps = [
            request::get_status(Recipient::Endpoint, 0x81).unwrap(),
            request::get_configuration().unwrap(),
            request::get_interface(2).unwrap(),
            request::synch_frame(0x83).unwrap(),
        ];

        for irp in &irps {
            assert!(!irp.accept_short_packet());
            assert_eq!(irp.length(), irp.setup().unwrap().length as usize);
        }
    }

    #[test]
    fn test_decode_status() {
        assert_eq!(request::decode_status(&[0x03, 0x00]).unwrap(), 0x0003);
        assert_eq!(request::decode_status(&[0x34, 0x12]).unwrap(), 0x1234);
        assert!(request::decode_status(&[0x01]).is_err());
    }
}
