//! Codec invariants checked over a spread of frame shapes:
//! round-trip, encoded size, and rejection of every truncated prefix.

use power_echonet::{meter, EData, Eoj, Frame, FrameError, Property};

fn frames() -> Vec<Frame> {
    let payload_lengths: [&[usize]; 5] = [&[], &[0], &[1, 4], &[0, 2, 4, 4, 1], &[255, 255]];

    payload_lengths
        .iter()
        .enumerate()
        .map(|(i, lengths)| Frame {
            header1: 0x10,
            header2: 0x81,
            transaction_id: (i as u16) * 0x0101,
            edata: EData {
                source: meter::SMART_METER,
                destination: Eoj::new(0x05, 0xFF, i as u8),
                service: meter::esv::GET_RES,
                properties: lengths
                    .iter()
                    .enumerate()
                    .map(|(j, len)| {
                        let payload: Vec<u8> = (0..*len).map(|b| (b * 7 + j) as u8).collect();
                        Property::new(0xD0 + j as u8, payload)
                    })
                    .collect(),
            },
        })
        .collect()
}

#[test]
fn roundtrip_preserves_every_field() {
    for frame in frames() {
        let bytes = frame.encode().unwrap();
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }
}

#[test]
fn encoded_size_matches_layout() {
    for frame in frames() {
        let bytes = frame.encode().unwrap();
        let expected = 4
            + 2 * 3
            + 2
            + frame
                .edata
                .properties
                .iter()
                .map(|p| 2 + p.payload.len())
                .sum::<usize>();
        assert_eq!(bytes.len(), expected);
        assert_eq!(frame.encoded_len(), expected);
    }
}

#[test]
fn every_truncated_prefix_is_rejected() {
    for frame in frames() {
        let bytes = frame.encode().unwrap();
        for len in 0..bytes.len() {
            let err = Frame::decode(&bytes[..len]).unwrap_err();
            assert!(
                matches!(err, FrameError::Truncated { .. }),
                "prefix of {} bytes gave {:?}",
                len,
                err
            );
        }
    }
}

#[test]
fn property_claiming_more_than_remains() {
    // OPC = 1, EPC = E7, PDC = 4 but only two payload bytes follow
    let bytes = [
        0x10, 0x81, 0x00, 0x01, 0x02, 0x88, 0x01, 0x05, 0xFF, 0x01, 0x72, 0x01, 0xE7, 0x04, 0x00,
        0x00,
    ];
    assert_eq!(
        Frame::decode(&bytes).unwrap_err(),
        FrameError::Truncated {
            field: "EDT",
            needed: 4,
            remaining: 2
        }
    );
}
