use crate::error::DecodeError;
use crate::replication::{ObjectId, ReplicatedState, TypedValue, Value, ValueType};

#[derive(Debug, Default, Clone)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_str(&mut self, value: &str) {
        self.write_u32(value.len() as u32);
        self.buf.extend_from_slice(value.as_bytes());
    }

    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a received message. Every read either consumes exactly the
/// bytes it needs or fails without advancing.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], DecodeError> {
        let available = self.data.len() - self.pos;
        if needed > available {
            return Err(DecodeError::Truncated { needed, available });
        }
        let slice = &self.data[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_be_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_be_bytes(self.take_array()?))
    }

    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let start = self.pos;
        let len = self.read_u32()?;
        if len as usize > self.remaining_len() {
            self.pos = start;
            return Err(DecodeError::LengthOverflow(len));
        }
        let bytes = self.take(len as usize)?;
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(s.to_owned()),
            Err(_) => {
                self.pos = start;
                Err(DecodeError::InvalidUtf8)
            }
        }
    }

    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    pub fn remaining_len(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining_len() == 0
    }

    pub fn position(&self) -> usize {
        self.pos
    }
}

pub fn encode_value(writer: &mut WireWriter, value: &TypedValue<'_>) {
    writer.write_u8(value.id());
    writer.write_u8(value.value_type().tag());
    match value.value() {
        Value::Bool(v) => writer.write_bool(*v),
        Value::Float(v) => writer.write_f32(*v),
        Value::Double(v) => writer.write_f64(*v),
        Value::String(v) => writer.write_str(v),
        Value::Int32(v) => writer.write_i32(*v),
        Value::Uint32(v) => writer.write_u32(*v),
        Value::Uint8(v) => writer.write_u8(*v),
    }
}

pub fn decode_value(reader: &mut WireReader<'_>) -> Result<TypedValue<'static>, DecodeError> {
    let start = reader.clone();
    let result = decode_value_inner(reader);
    if result.is_err() {
        *reader = start;
    }
    result
}

fn decode_value_inner(reader: &mut WireReader<'_>) -> Result<TypedValue<'static>, DecodeError> {
    let id = reader.read_u8()?;
    let value_type = ValueType::try_from(reader.read_u8()?)?;
    let value = match value_type {
        ValueType::Bool => Value::Bool(reader.read_bool()?),
        ValueType::Float => Value::Float(reader.read_f32()?),
        ValueType::Double => Value::Double(reader.read_f64()?),
        ValueType::String => Value::String(reader.read_string()?),
        ValueType::Int32 => Value::Int32(reader.read_i32()?),
        ValueType::Uint32 => Value::Uint32(reader.read_u32()?),
        ValueType::Uint8 => Value::Uint8(reader.read_u8()?),
    };
    Ok(TypedValue::owned(id, value))
}

pub fn encode_object(writer: &mut WireWriter, state: &ReplicatedState<'_>) {
    writer.write_u16(state.object_id().raw());
    writer.write_u8(state.len() as u8);
    for value in state.values() {
        encode_value(writer, value);
    }
}

pub fn decode_object(reader: &mut WireReader<'_>) -> Result<ReplicatedState<'static>, DecodeError> {
    let start = reader.clone();
    let result = decode_object_inner(reader);
    if result.is_err() {
        *reader = start;
    }
    result
}

fn decode_object_inner(reader: &mut WireReader<'_>) -> Result<ReplicatedState<'static>, DecodeError> {
    let object_id = ObjectId::new(reader.read_u16()?);
    let count = reader.read_u8()? as usize;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(decode_value(reader)?);
    }
    Ok(ReplicatedState::from_values(object_id, values))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_encodes_as_single_byte() {
        let mut writer = WireWriter::new();
        writer.write_bool(true);
        writer.write_bool(false);
        assert_eq!(writer.as_slice(), &[1, 0]);
    }

    #[test]
    fn test_integers_are_big_endian() {
        let mut writer = WireWriter::new();
        writer.write_u16(0x0102);
        writer.write_u32(0x0304_0506);
        assert_eq!(writer.as_slice(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_string_has_u32_length_prefix() {
        let mut writer = WireWriter::new();
        writer.write_str("ab");
        assert_eq!(writer.as_slice(), &[0, 0, 0, 2, b'a', b'b']);
    }

    #[test]
    fn test_value_wire_layout() {
        let mut writer = WireWriter::new();
        encode_value(&mut writer, &TypedValue::owned(3, Value::Uint32(7)));
        assert_eq!(writer.as_slice(), &[3, 5, 0, 0, 0, 7]);
    }

    #[test]
    fn test_object_wire_layout() {
        let state = ReplicatedState::from_values(
            ObjectId::new(7),
            vec![
                TypedValue::owned(0, Value::Bool(true)),
                TypedValue::owned(1, Value::Uint8(9)),
            ],
        );
        let mut writer = WireWriter::new();
        encode_object(&mut writer, &state);
        assert_eq!(writer.as_slice(), &[0, 7, 2, 0, 0, 1, 1, 6, 9]);
    }

    #[test]
    fn test_object_roundtrip_mixed_types() {
        let state = ReplicatedState::from_values(
            ObjectId::new(42),
            vec![
                TypedValue::owned(0, Value::String("alpha".into())),
                TypedValue::owned(1, Value::Double(-2.5)),
                TypedValue::owned(2, Value::Int32(-17)),
                TypedValue::owned(3, Value::Float(0.25)),
            ],
        );
        let mut writer = WireWriter::new();
        encode_object(&mut writer, &state);

        let bytes = writer.into_bytes();
        let mut reader = WireReader::new(&bytes);
        let decoded = decode_object(&mut reader).unwrap();
        assert_eq!(decoded, state);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_every_value_type_survives_the_wire() {
        let values = [
            Value::Bool(true),
            Value::Bool(false),
            Value::Float(-0.5),
            Value::Double(f64::MAX),
            Value::String(String::new()),
            Value::String("été".into()),
            Value::Int32(i32::MIN),
            Value::Int32(-1),
            Value::Uint32(u32::MAX),
            Value::Uint8(u8::MAX),
        ];
        for (id, value) in values.into_iter().enumerate() {
            let typed = TypedValue::owned(id as u8, value);
            let mut writer = WireWriter::new();
            encode_value(&mut writer, &typed);
            assert_eq!(writer.as_slice()[1], typed.value_type().tag());

            let bytes = writer.into_bytes();
            let mut reader = WireReader::new(&bytes);
            assert_eq!(decode_value(&mut reader).unwrap(), typed);
            assert!(reader.is_empty());
        }
    }

    #[test]
    fn test_unknown_type_tag_rejected() {
        let bytes = [0u8, 9, 1];
        let mut reader = WireReader::new(&bytes);
        assert_eq!(decode_value(&mut reader), Err(DecodeError::UnknownTypeTag(9)));
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_truncated_object_leaves_reader_untouched() {
        // Claims two fields but carries one.
        let bytes = [0u8, 1, 2, 0, 6, 5];
        let mut reader = WireReader::new(&bytes);
        assert!(matches!(
            decode_object(&mut reader),
            Err(DecodeError::Truncated { .. })
        ));
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_string_length_beyond_input() {
        let bytes = [0u8, 0, 0, 200, b'x'];
        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_string(), Err(DecodeError::LengthOverflow(200)));
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let bytes = [0u8, 0, 0, 2, 0xff, 0xfe];
        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_string(), Err(DecodeError::InvalidUtf8));
    }

    #[test]
    fn test_read_rest_consumes_everything() {
        let bytes = [1u8, 2, 3, 4];
        let mut reader = WireReader::new(&bytes);
        reader.read_u8().unwrap();
        assert_eq!(reader.read_rest(), &[2, 3, 4]);
        assert!(reader.is_empty());
    }
}
