//! Marker poses as OpenIGTLink `TDATA` messages.
//!
//! Framing, CRC and the element layout come from `openigtlink-rust`; this
//! module only maps [`Marker`]s onto its tracking-data message.

use crate::types::Marker;
use crate::Result;
use openigtlink_rust::protocol::header::{Header, Timestamp};
use openigtlink_rust::protocol::message::IgtlMessage;
use openigtlink_rust::protocol::types::{TDataMessage, TrackingDataElement, TrackingInstrumentType};
use std::io::Read;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const DEFAULT_PORT: u16 = 22222;

/// Size of the fixed message header preceding every body.
pub const HEADER_SIZE: usize = 58;

/// Byte size of the element and device name fields.
pub const NAME_FIELD_SIZE: usize = 20;

/// Longest prefix of `name` that fits in `max` bytes without splitting a
/// UTF-8 character.
pub fn fit_name(name: &str, max: usize) -> &str {
    if name.len() <= max {
        return name;
    }
    let end = (0..=max)
        .rev()
        .find(|&i| name.is_char_boundary(i))
        .unwrap_or(0);
    &name[..end]
}

/// Header timestamp (seconds plus a 32-bit binary fraction) of a wall-clock time.
pub fn timestamp(time: SystemTime) -> Timestamp {
    let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
    Timestamp {
        seconds: since_epoch.as_secs() as u32,
        fraction: (((since_epoch.subsec_nanos() as u64) << 32) / 1_000_000_000) as u32,
    }
}

/// Name a marker goes by on the wire.
pub fn element_name(marker: &Marker) -> String {
    let name = if marker.name.is_empty() {
        format!("geometry{}", marker.geometry_id)
    } else {
        marker.name.clone()
    };
    fit_name(&name, NAME_FIELD_SIZE - 1).to_string()
}

/// One 6D element per marker, carrying the upper 3x4 of its transform.
pub fn tracking_data<'a>(markers: impl IntoIterator<Item = &'a Marker>) -> TDataMessage {
    let elements = markers
        .into_iter()
        .map(|m| {
            let t = &m.transform;
            TrackingDataElement::new(
                element_name(m),
                TrackingInstrumentType::Instrument6D,
                [t[0], t[1], t[2]],
            )
        })
        .collect();
    TDataMessage::new(elements)
}

/// `TDATA` message from `device_name`, stamped with the poll time.
pub fn tracking_message<'a>(
    device_name: &str,
    time: SystemTime,
    markers: impl IntoIterator<Item = &'a Marker>,
) -> Result<IgtlMessage<TDataMessage>> {
    let mut message = IgtlMessage::new(
        tracking_data(markers),
        fit_name(device_name, NAME_FIELD_SIZE - 1),
    )?;
    message.header.timestamp = timestamp(time);
    Ok(message)
}

/// Encoded `TDATA` packet, ready to write to every client.
pub fn pack<'a>(
    device_name: &str,
    time: SystemTime,
    markers: impl IntoIterator<Item = &'a Marker>,
) -> Result<Vec<u8>> {
    Ok(tracking_message(device_name, time, markers)?.encode()?)
}

/// Read one framed message from `reader` and decode it as `TDATA`.
pub fn read_tracking_message(reader: &mut impl Read) -> Result<IgtlMessage<TDataMessage>> {
    let mut packet = vec![0u8; HEADER_SIZE];
    reader.read_exact(&mut packet)?;
    let header = Header::decode(&packet)?;

    packet.resize(HEADER_SIZE + header.body_size as usize, 0);
    reader.read_exact(&mut packet[HEADER_SIZE..])?;
    Ok(IgtlMessage::<TDataMessage>::decode(&packet)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::transform_from_pose;

    #[test]
    fn test_elements_follow_markers() {
        let mut pointer = Marker::new(2, "Pointer");
        pointer.transform = transform_from_pose(
            &[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]],
            &[10.0, 11.0, 12.0],
        );
        let unnamed = Marker::new(7, "");

        let data = tracking_data([&pointer, &unnamed]);
        assert_eq!(data.elements.len(), 2);
        assert_eq!(data.elements[0].name, "Pointer");
        assert_eq!(data.elements[0].instrument_type, TrackingInstrumentType::Instrument6D);
        assert_eq!(data.elements[0].matrix[0], [1.0, 2.0, 3.0, 10.0]);
        assert_eq!(data.elements[0].matrix[2], [7.0, 8.0, 9.0, 12.0]);
        assert_eq!(data.elements[1].name, "geometry7");
        assert_eq!(data.elements[1].matrix[1], [0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_packet_decodes() {
        let mut pointer = Marker::new(2, "Pointer");
        pointer.transform[0][3] = 42.0;
        let time = UNIX_EPOCH + Duration::new(100, 0);

        let packet = pack("AtracsysTracker", time, [&pointer]).unwrap();
        let decoded = read_tracking_message(&mut packet.as_slice()).unwrap();

        assert_eq!(decoded.header.timestamp.seconds, 100);
        assert_eq!(decoded.content.elements.len(), 1);
        assert_eq!(decoded.content.elements[0].name, "Pointer");
        assert_eq!(decoded.content.elements[0].matrix[0][3], 42.0);
    }

    #[test]
    fn test_truncated_packet_is_an_error() {
        let packet = pack("dev", SystemTime::now(), [&Marker::new(1, "Tool")]).unwrap();
        let mut short = &packet[..packet.len() - 1];
        assert!(read_tracking_message(&mut short).is_err());
    }

    #[test]
    fn test_fit_name_keeps_characters_whole() {
        assert_eq!(fit_name("Pointer", 19), "Pointer");
        assert_eq!(fit_name("ABCDEFGHIJKLMNOPQRSTUVWXYZ", 19), "ABCDEFGHIJKLMNOPQRS");
        // 'é' is two bytes and would straddle the limit.
        let name = "ultrasound-sondé";
        assert_eq!(name.len(), 17);
        assert_eq!(fit_name(name, 16), "ultrasound-sond");

        let marker = Marker::new(3, "Échographie-linéaire");
        let wire = element_name(&marker);
        assert!(wire.len() <= NAME_FIELD_SIZE - 1);
        assert!(!wire.contains('\u{FFFD}'));
        assert!(marker.name.starts_with(&wire));
    }

    #[test]
    fn test_timestamp_fraction() {
        let t = timestamp(UNIX_EPOCH + Duration::new(5, 500_000_000));
        assert_eq!(t.seconds, 5);
        assert_eq!(t.fraction, 0x8000_0000);
    }
}
