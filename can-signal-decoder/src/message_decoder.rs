//! Message Decoding Engine
//!
//! Extracts signal values from raw CAN payloads based on the signal
//! definitions in the dictionary. Handles bit extraction for both byte orders,
//! sign extension and physical value conversion.

use crate::signals::database::{ByteOrder, MessageDefinition, SignalDatabase, SignalDefinition, ValueType};
use crate::types::{DecodedSignals, DecoderError, Result};

/// Message decoder - extracts signals from CAN payloads
pub struct MessageDecoder;

impl MessageDecoder {
    /// Decode every signal of the message registered for `can_id`
    ///
    /// Fails with `UnknownMessage` when the ID is not in the dictionary and with
    /// `PayloadTooShort` when the payload is shorter than the declared DLC.
    /// A signal whose bit range does not fit the payload is logged and left
    /// out of the result; the remaining signals are still decoded.
    pub fn decode(db: &SignalDatabase, can_id: u32, data: &[u8]) -> Result<DecodedSignals> {
        let message = db
            .get_message(can_id)
            .ok_or(DecoderError::UnknownMessage(can_id))?;

        if data.len() < message.dlc {
            return Err(DecoderError::PayloadTooShort {
                id: can_id,
                expected: message.dlc,
                actual: data.len(),
            });
        }

        Ok(Self::decode_signals(message, data, |_| true))
    }

    /// Decode the signals of `message` accepted by `keep`, without a DLC check
    ///
    /// This is the lenient path used while streaming capture logs: every
    /// per-signal failure is logged and the signal is omitted. Signals are
    /// bounded by the declared DLC even when the payload carries more bytes.
    pub fn decode_signals<F>(message: &MessageDefinition, data: &[u8], keep: F) -> DecodedSignals
    where
        F: Fn(&str) -> bool,
    {
        let mut decoded = DecodedSignals::new();
        let payload = &data[..data.len().min(message.dlc)];

        for signal in message.signals.iter().filter(|s| keep(&s.name)) {
            match Self::decode_signal(payload, signal) {
                Ok(value) => {
                    decoded.insert(signal.name.clone(), value);
                }
                Err(e) => {
                    log::warn!("Skipping signal in {} (ID 0x{:X}): {}", message.name, message.id, e);
                }
            }
        }

        decoded
    }

    /// Decode a single signal to its physical value
    pub fn decode_signal(data: &[u8], signal: &SignalDefinition) -> Result<f64> {
        let raw = Self::extract_signal_value(data, signal)?;
        Ok(signal.physical(raw))
    }

    /// Extract raw signal value from payload data
    ///
    /// Validates the bit range against the payload, extracts according to the
    /// signal's byte order and sign-extends signed values.
    pub fn extract_signal_value(data: &[u8], signal: &SignalDefinition) -> Result<i64> {
        let length = usize::from(signal.length);
        let available_bits = data.len() * 8;

        let raw = match signal.byte_order {
            ByteOrder::BigEndian => {
                let msb = motorola_msb_position(signal.start_bit);
                if msb + length > available_bits {
                    return Err(out_of_range(signal, msb + length, available_bits));
                }
                Self::extract_big_endian(data, msb, length)
            }
            ByteOrder::LittleEndian => {
                let start = usize::from(signal.start_bit);
                if start + length > available_bits {
                    return Err(out_of_range(signal, start + length, available_bits));
                }
                Self::extract_little_endian(data, start, length)
            }
        };

        Ok(match signal.value_type {
            ValueType::Unsigned => raw as i64,
            ValueType::Signed => Self::sign_extend(raw, length),
        })
    }

    /// Extract a big-endian (Motorola) field
    ///
    /// `position` counts bits MSB-first across the payload: bit 0 is the most
    /// significant bit of byte 0. The first extracted bit becomes the most
    /// significant bit of the result.
    pub fn extract_big_endian(data: &[u8], position: usize, length: usize) -> u64 {
        let mut result: u64 = 0;

        for i in 0..length {
            let bit_pos = position + i;
            let byte_idx = bit_pos / 8;
            let bit_in_byte = 7 - (bit_pos % 8);

            if byte_idx < data.len() {
                let bit_value = u64::from((data[byte_idx] >> bit_in_byte) & 0x01);
                result |= bit_value << (length - 1 - i);
            }
        }

        result
    }

    /// Extract a little-endian (Intel) field
    ///
    /// Bytes from `start_bit / 8` onward are packed LSB-first into an
    /// accumulator, which is then shifted right by the bit offset and masked
    /// to `length` bits.
    pub fn extract_little_endian(data: &[u8], start_bit: usize, length: usize) -> u64 {
        let start_byte = start_bit / 8;
        let bit_offset = start_bit % 8;
        let bytes_needed = (bit_offset + length + 7) / 8;

        // Up to 9 bytes for a 64-bit field with an offset
        let mut acc: u128 = 0;
        for i in 0..bytes_needed {
            if let Some(byte) = data.get(start_byte + i) {
                acc |= u128::from(*byte) << (i * 8);
            }
        }

        let mask: u128 = (1u128 << length) - 1;
        ((acc >> bit_offset) & mask) as u64
    }

    /// Sign-extend a value from N bits to 64 bits
    pub fn sign_extend(value: u64, bit_length: usize) -> i64 {
        if bit_length == 0 || bit_length >= 64 {
            return value as i64;
        }

        let sign_bit = 1u64 << (bit_length - 1);
        if (value & sign_bit) != 0 {
            let mask = !0u64 << bit_length;
            (value | mask) as i64
        } else {
            value as i64
        }
    }
}

/// Convert a DBC Motorola start bit (MSB, numbered LSB=0 within its byte) to
/// the MSB-first sequential position used by `extract_big_endian`.
///
/// This is the usual DBC Motorola (sawtooth) numbering: start bit 7 with
/// length 8 is the whole of byte 0, not a run of `start_bit + i` bits.
fn motorola_msb_position(start_bit: u16) -> usize {
    let start = usize::from(start_bit);
    (start / 8) * 8 + (7 - start % 8)
}

fn out_of_range(signal: &SignalDefinition, required_bits: usize, available_bits: usize) -> DecoderError {
    DecoderError::SignalOutOfRange {
        signal: signal.name.clone(),
        required_bits,
        available_bits,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(start_bit: u16, length: u16, order: ByteOrder, value_type: ValueType) -> SignalDefinition {
        SignalDefinition {
            name: "Sig".to_string(),
            start_bit,
            length,
            byte_order: order,
            value_type,
            factor: 1.0,
            offset: 0.0,
            min: 0.0,
            max: 0.0,
            unit: String::new(),
        }
    }

    fn db_with(id: u32, dlc: usize, signals: Vec<SignalDefinition>) -> SignalDatabase {
        let mut db = SignalDatabase::new();
        db.add_message(MessageDefinition {
            id,
            name: "Msg".to_string(),
            dlc,
            sender: "ECU".to_string(),
            signals,
        });
        db
    }

    /// Pack `raw` into `data` with the same layout rules the decoder reads
    fn encode_big_endian(data: &mut [u8], start_bit: u16, length: usize, raw: u64) {
        let msb = motorola_msb_position(start_bit);
        for i in 0..length {
            let bit = (raw >> (length - 1 - i)) & 1;
            let pos = msb + i;
            data[pos / 8] |= (bit as u8) << (7 - pos % 8);
        }
    }

    fn encode_little_endian(data: &mut [u8], start_bit: usize, length: usize, raw: u64) {
        for i in 0..length {
            let bit = (raw >> i) & 1;
            let pos = start_bit + i;
            data[pos / 8] |= (bit as u8) << (pos % 8);
        }
    }

    #[test]
    fn test_big_endian_full_byte() {
        let sig = signal(7, 8, ByteOrder::BigEndian, ValueType::Unsigned);
        let data = [0xFF, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(MessageDecoder::extract_signal_value(&data, &sig).unwrap(), 255);
        assert_eq!(MessageDecoder::decode_signal(&data, &sig).unwrap(), 255.0);
    }

    #[test]
    fn test_big_endian_signed_nibble() {
        let sig = signal(7, 4, ByteOrder::BigEndian, ValueType::Signed);
        let data = [0b1000_0000, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(MessageDecoder::decode_signal(&data, &sig).unwrap(), -8.0);
    }

    #[test]
    fn test_extract_big_endian_sequential() {
        let data = [0xAB, 0xCD, 0xEF, 0x12];
        assert_eq!(MessageDecoder::extract_big_endian(&data, 0, 8), 0xAB);
        assert_eq!(MessageDecoder::extract_big_endian(&data, 0, 16), 0xABCD);
        assert_eq!(MessageDecoder::extract_big_endian(&data, 4, 8), 0xBC);
    }

    #[test]
    fn test_big_endian_cross_byte() {
        // Motorola start bit 3 = fourth bit of byte 0, running into byte 1
        let sig = signal(3, 12, ByteOrder::BigEndian, ValueType::Unsigned);
        let data = [0x0A, 0xBC, 0, 0];
        assert_eq!(MessageDecoder::extract_signal_value(&data, &sig).unwrap(), 0xABC);
    }

    #[test]
    fn test_extract_little_endian_simple() {
        let data = vec![0xAB, 0xCD, 0xEF, 0x12];
        assert_eq!(MessageDecoder::extract_little_endian(&data, 0, 8), 0xAB);
        assert_eq!(MessageDecoder::extract_little_endian(&data, 0, 16), 0xCDAB);
    }

    #[test]
    fn test_extract_little_endian_offset() {
        // 4 bits starting at bit 4 -> high nibble of byte 0
        let data = vec![0xAB];
        assert_eq!(MessageDecoder::extract_little_endian(&data, 4, 4), 0xA);
        // 12 bits starting at bit 12 -> high nibble of byte 1 + byte 2
        let data = vec![0x00, 0xF0, 0x3C];
        assert_eq!(MessageDecoder::extract_little_endian(&data, 12, 12), 0x3CF);
    }

    #[test]
    fn test_extract_little_endian_full_width() {
        let data = [0xFF; 8];
        assert_eq!(MessageDecoder::extract_little_endian(&data, 0, 64), u64::MAX);
    }

    #[test]
    fn test_little_endian_signed() {
        let sig = signal(0, 16, ByteOrder::LittleEndian, ValueType::Signed);
        let data = [0x00, 0x80];
        assert_eq!(MessageDecoder::extract_signal_value(&data, &sig).unwrap(), -32768);
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(MessageDecoder::sign_extend(0x7F, 8), 127);
        assert_eq!(MessageDecoder::sign_extend(0xFF, 8), -1);
        assert_eq!(MessageDecoder::sign_extend(0x8000, 16), -32768);
        assert_eq!(MessageDecoder::sign_extend(u64::MAX, 64), -1);
    }

    #[test]
    fn test_scaling_applied() {
        let mut sig = signal(0, 8, ByteOrder::LittleEndian, ValueType::Unsigned);
        sig.factor = 0.5;
        sig.offset = -10.0;
        let data = [100];
        assert_eq!(MessageDecoder::decode_signal(&data, &sig).unwrap(), 40.0);
    }

    #[test]
    fn test_round_trip_both_layouts() {
        let cases: [(u16, usize, u64); 4] = [(7, 8, 0x5A), (13, 11, 0x3F1), (39, 16, 0xBEEF), (0, 1, 1)];
        for (start, len, raw) in cases {
            let mut data = [0u8; 8];
            encode_big_endian(&mut data, start, len, raw);
            let mut sig = signal(start, len as u16, ByteOrder::BigEndian, ValueType::Unsigned);
            sig.factor = 0.25;
            sig.offset = 3.0;
            let value = MessageDecoder::decode_signal(&data, &sig).unwrap();
            assert!((value - (raw as f64 * 0.25 + 3.0)).abs() < 1e-9, "big-endian {start}/{len}");

            let mut data = [0u8; 8];
            encode_little_endian(&mut data, start as usize, len, raw);
            sig.byte_order = ByteOrder::LittleEndian;
            let value = MessageDecoder::decode_signal(&data, &sig).unwrap();
            assert!((value - (raw as f64 * 0.25 + 3.0)).abs() < 1e-9, "little-endian {start}/{len}");
        }
    }

    #[test]
    fn test_round_trip_signed_negative() {
        let raw: i64 = -300;
        let mut data = [0u8; 8];
        encode_little_endian(&mut data, 8, 12, (raw as u64) & 0xFFF);
        let sig = signal(8, 12, ByteOrder::LittleEndian, ValueType::Signed);
        assert_eq!(MessageDecoder::extract_signal_value(&data, &sig).unwrap(), raw);
    }

    #[test]
    fn test_decode_unknown_message() {
        let db = db_with(0x100, 8, vec![]);
        let result = MessageDecoder::decode(&db, 0x200, &[0; 8]);
        assert!(matches!(result, Err(DecoderError::UnknownMessage(0x200))));
    }

    #[test]
    fn test_decode_rejects_short_payload() {
        let db = db_with(0x100, 8, vec![signal(0, 8, ByteOrder::LittleEndian, ValueType::Unsigned)]);
        let result = MessageDecoder::decode(&db, 0x100, &[1, 2, 3]);
        assert!(matches!(
            result,
            Err(DecoderError::PayloadTooShort { expected: 8, actual: 3, .. })
        ));
    }

    #[test]
    fn test_out_of_range_signal_is_omitted() {
        let mut fits = signal(0, 8, ByteOrder::LittleEndian, ValueType::Unsigned);
        fits.name = "Fits".to_string();
        let mut too_far = signal(60, 8, ByteOrder::LittleEndian, ValueType::Unsigned);
        too_far.name = "TooFar".to_string();
        let db = db_with(0x100, 8, vec![fits, too_far]);

        let decoded = MessageDecoder::decode(&db, 0x100, &[7, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded["Fits"], 7.0);
    }

    #[test]
    fn test_signal_beyond_dlc_is_omitted_even_with_long_payload() {
        let mut near = signal(0, 8, ByteOrder::LittleEndian, ValueType::Unsigned);
        near.name = "Near".to_string();
        let mut far = signal(16, 8, ByteOrder::LittleEndian, ValueType::Unsigned);
        far.name = "Far".to_string();
        let db = db_with(0x100, 2, vec![near, far]);

        let decoded = MessageDecoder::decode(&db, 0x100, &[5, 0, 0x2A, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded["Near"], 5.0);
        assert!(!decoded.contains_key("Far"));
    }

    #[test]
    fn test_decode_is_deterministic() {
        let db = db_with(0x1, 8, vec![signal(7, 16, ByteOrder::BigEndian, ValueType::Signed)]);
        let data = [0x12, 0x34, 0x56, 0x78, 0, 0, 0, 0];
        let first = MessageDecoder::decode(&db, 0x1, &data).unwrap();
        let second = MessageDecoder::decode(&db, 0x1, &data).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_decode_signals_filter() {
        let mut a = signal(0, 8, ByteOrder::LittleEndian, ValueType::Unsigned);
        a.name = "A".to_string();
        let mut b = signal(8, 8, ByteOrder::LittleEndian, ValueType::Unsigned);
        b.name = "B".to_string();
        let db = db_with(0x5, 2, vec![a, b]);
        let msg = db.get_message(0x5).unwrap();

        let decoded = MessageDecoder::decode_signals(msg, &[1, 2], |name| name == "B");
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded["B"], 2.0);
    }
}
