use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::encoding::CharacterEncoding;
use crate::util::{checked_u32_le, pad_to_word, read_u32_le};
use crate::{RandomiserError, Result};

pub const INSTRUCTION_HEADER_SIZE: usize = 8;
pub const STRING_PADDING: u8 = 0xCC;
pub const UNKNOWN_INSTRUCTION_NAME: &str = "UNKNOWN";

/// Symbolic label name to byte offset inside an event's code area.
pub type Labels = BTreeMap<String, u32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgumentType {
    U32,
    String,
    AsciiString,
    Bytes,
    ValueLocation,
    InstructionLocation,
}

/// Which pool an operand is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueLocation {
    Zero = 0,
    One = 1,
    Constant = 2,
    Three = 3,
}

impl ValueLocation {
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(ValueLocation::Zero),
            1 => Ok(ValueLocation::One),
            2 => Ok(ValueLocation::Constant),
            3 => Ok(ValueLocation::Three),
            other => Err(RandomiserError::InvalidValueLocation(other)),
        }
    }

    pub fn script_name(self) -> &'static str {
        match self {
            ValueLocation::Zero => "Pool_0",
            ValueLocation::One => "Pool_1",
            ValueLocation::Constant => "Const",
            ValueLocation::Three => "Pool_3",
        }
    }

    pub fn from_script_name(name: &str) -> Option<Self> {
        match name {
            "Pool_0" => Some(ValueLocation::Zero),
            "Pool_1" => Some(ValueLocation::One),
            "Const" => Some(ValueLocation::Constant),
            "Pool_3" => Some(ValueLocation::Three),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionType {
    #[serde(with = "hex_id")]
    pub id: u32,
    pub name: String,
    pub arguments: Vec<ArgumentType>,
}

mod hex_id {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(id: &u32, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{:x}", id))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
        let s = String::deserialize(d)?;
        crate::util::parse_hex_u32(&s).ok_or_else(|| D::Error::custom(format!("invalid id '{s}'")))
    }
}

impl InstructionType {
    pub fn unknown(id: u32) -> Self {
        InstructionType {
            id,
            name: UNKNOWN_INSTRUCTION_NAME.to_string(),
            arguments: vec![ArgumentType::Bytes],
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.name == UNKNOWN_INSTRUCTION_NAME
    }
}

/// Registry of known instruction types, indexed by id and by name.
#[derive(Debug, Clone, Default)]
pub struct InstructionSet {
    by_id: HashMap<u32, Arc<InstructionType>>,
    by_name: HashMap<String, Arc<InstructionType>>,
}

impl InstructionSet {
    pub fn new<I: IntoIterator<Item = InstructionType>>(types: I) -> Self {
        let mut set = InstructionSet::default();
        for ty in types {
            let ty = Arc::new(ty);
            set.by_name.insert(ty.name.clone(), ty.clone());
            set.by_id.insert(ty.id, ty);
        }
        set
    }

    /// Load from a JSON array of `{ "id": "0x..", "name": .., "arguments": [..] }`.
    pub fn from_json_str(src: &str) -> Result<Self> {
        let types: Vec<InstructionType> = serde_json::from_str(src)?;
        Ok(InstructionSet::new(types))
    }

    /// Type for `id`; ids missing from the registry decode as raw bytes.
    pub fn get(&self, id: u32) -> Arc<InstructionType> {
        self.by_id
            .get(&id)
            .cloned()
            .unwrap_or_else(|| Arc::new(InstructionType::unknown(id)))
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<InstructionType>> {
        self.by_name.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
    U32(u32),
    String(String),
    AsciiString(String),
    Bytes(Vec<u8>),
    ValueLocation(ValueLocation),
    /// Name of the label this argument jumps to.
    InstructionLocation(String),
}

impl Argument {
    pub fn kind(&self) -> ArgumentType {
        match self {
            Argument::U32(_) => ArgumentType::U32,
            Argument::String(_) => ArgumentType::String,
            Argument::AsciiString(_) => ArgumentType::AsciiString,
            Argument::Bytes(_) => ArgumentType::Bytes,
            Argument::ValueLocation(_) => ArgumentType::ValueLocation,
            Argument::InstructionLocation(_) => ArgumentType::InstructionLocation,
        }
    }
}

/// Undecoded `{type id, payload}` unit as stored in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInstruction {
    pub type_id: u32,
    pub payload: Vec<u8>,
}

impl RawInstruction {
    /// Read the instruction at `offset`. `Ok(None)` once fewer than four
    /// bytes remain.
    pub fn read(buf: &[u8], offset: usize) -> Result<Option<(RawInstruction, usize)>> {
        if offset + 4 > buf.len() {
            return Ok(None);
        }
        let type_id = read_u32_le(buf, offset);
        let length = checked_u32_le(buf, offset + 4, "instruction length")
            .map_err(|_| RandomiserError::TruncatedInstruction { offset })?
            as usize;

        if length < INSTRUCTION_HEADER_SIZE || offset + length > buf.len() {
            return Err(RandomiserError::TruncatedInstruction { offset });
        }

        let payload = buf[offset + INSTRUCTION_HEADER_SIZE..offset + length].to_vec();
        Ok(Some((RawInstruction { type_id, payload }, offset + length)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub kind: Arc<InstructionType>,
    pub arguments: Vec<Argument>,
}

impl Instruction {
    /// Build an instruction, checking the arguments against the type.
    pub fn new(kind: Arc<InstructionType>, arguments: Vec<Argument>) -> Result<Self> {
        let matches = kind.arguments.len() == arguments.len()
            && kind
                .arguments
                .iter()
                .zip(arguments.iter())
                .all(|(ty, arg)| *ty == arg.kind());
        if !matches {
            return Err(RandomiserError::ArgumentMismatch {
                name: kind.name.clone(),
                expected: format!("{:?}", kind.arguments),
                got: format!("{:?}", arguments.iter().map(Argument::kind).collect::<Vec<_>>()),
            });
        }
        Ok(Instruction { kind, arguments })
    }

    pub fn type_id(&self) -> u32 {
        self.kind.id
    }

    pub fn name(&self) -> &str {
        &self.kind.name
    }

    /// Decode a raw instruction's payload against its type. Jump targets are
    /// returned as labels named after their hex offset.
    pub fn decode(
        raw: &RawInstruction,
        kind: Arc<InstructionType>,
        encoding: &dyn CharacterEncoding,
    ) -> Result<(Instruction, Labels)> {
        let data = &raw.payload;
        let mut arguments = Vec::with_capacity(kind.arguments.len());
        let mut labels = Labels::new();
        let mut current = 0usize;

        for arg_type in &kind.arguments {
            let rest = data.get(current..).unwrap_or(&[]);
            match arg_type {
                ArgumentType::U32 => {
                    arguments.push(Argument::U32(checked_u32_le(data, current, "u32 argument")?));
                    current += 4;
                }
                ArgumentType::ValueLocation => {
                    let value = checked_u32_le(data, current, "value location argument")?;
                    arguments.push(Argument::ValueLocation(ValueLocation::from_u32(value)?));
                    current += 4;
                }
                ArgumentType::InstructionLocation => {
                    let target = checked_u32_le(data, current, "jump target argument")?;
                    let label = format!("0x{:x}", target);
                    labels.insert(label.clone(), target);
                    arguments.push(Argument::InstructionLocation(label));
                    current += 4;
                }
                ArgumentType::Bytes => {
                    arguments.push(Argument::Bytes(rest.to_vec()));
                    current = data.len();
                }
                ArgumentType::AsciiString => {
                    let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
                    let text: String = rest[..end].iter().map(|&b| b as char).collect();
                    arguments.push(Argument::AsciiString(text));
                    // Only ever the final argument; the padding goes with it.
                    current = data.len();
                }
                ArgumentType::String => {
                    arguments.push(Argument::String(encoding.decode(rest)?));
                    current = data.len();
                }
            }
        }

        Ok((Instruction { kind, arguments }, labels))
    }

    /// Encode header and payload. Without a label table, jump targets are
    /// written as zero, which is enough for measuring.
    pub fn encode(
        &self,
        labels: Option<&Labels>,
        encoding: &dyn CharacterEncoding,
    ) -> Result<Vec<u8>> {
        let mut data = Vec::new();

        for argument in &self.arguments {
            match argument {
                Argument::U32(value) => data.extend_from_slice(&value.to_le_bytes()),
                Argument::ValueLocation(loc) => {
                    data.extend_from_slice(&(*loc as u32).to_le_bytes())
                }
                Argument::InstructionLocation(label) => {
                    let target = match labels {
                        Some(labels) => *labels
                            .get(label)
                            .ok_or_else(|| RandomiserError::UnresolvedLabel(label.clone()))?,
                        None => 0,
                    };
                    data.extend_from_slice(&target.to_le_bytes());
                }
                Argument::Bytes(bytes) => data.extend_from_slice(bytes),
                Argument::AsciiString(text) => {
                    let start = data.len();
                    for c in text.chars() {
                        // One byte per char, and a NUL would end the string early.
                        match u8::try_from(c) {
                            Ok(b) if b != 0 => data.push(b),
                            _ => {
                                return Err(RandomiserError::Encoding(format!(
                                    "{:?} cannot be stored in an ASCII string argument of {}",
                                    c,
                                    self.name()
                                )))
                            }
                        }
                    }
                    data.push(0x00);
                    let written = data.len() - start;
                    pad_to_word(&mut data, written, STRING_PADDING);
                }
                Argument::String(text) => {
                    let bytes = encoding.encode(text)?;
                    data.extend_from_slice(&bytes);
                    pad_to_word(&mut data, bytes.len(), STRING_PADDING);
                }
            }
        }

        let length = (data.len() + INSTRUCTION_HEADER_SIZE) as u32;
        let mut out = Vec::with_capacity(length as usize);
        out.extend_from_slice(&self.type_id().to_le_bytes());
        out.extend_from_slice(&length.to_le_bytes());
        out.extend_from_slice(&data);
        Ok(out)
    }

    /// Encoded size in bytes, header included.
    pub fn encoded_len(&self, encoding: &dyn CharacterEncoding) -> Result<usize> {
        Ok(self.encode(None, encoding)?.len())
    }

    /// Decode and check that re-encoding reproduces the stored length.
    pub fn decode_checked(
        raw: &RawInstruction,
        set: &InstructionSet,
        encoding: &dyn CharacterEncoding,
    ) -> Result<(Instruction, Labels)> {
        let (instruction, labels) = Instruction::decode(raw, set.get(raw.type_id), encoding)?;
        let decoded = raw.payload.len() + INSTRUCTION_HEADER_SIZE;
        let encoded = instruction.encoded_len(encoding)?;
        if encoded != decoded {
            return Err(RandomiserError::InstructionLengthMismatch {
                name: instruction.name().to_string(),
                decoded,
                encoded,
            });
        }
        Ok((instruction, labels))
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut line = format!("{:<12}", self.name());
        if self.kind.is_unknown() {
            line.push_str(&format!(" 0x{:x}", self.type_id()));
        }
        for argument in &self.arguments {
            line.push(' ');
            line.push_str(&argument_literal(argument));
        }
        f.write_str(line.trim_end())
    }
}

fn argument_literal(argument: &Argument) -> String {
    match argument {
        Argument::U32(value) => format!("0x{:x}", value),
        Argument::Bytes(bytes) => crate::util::bytes_literal(bytes),
        Argument::ValueLocation(loc) => loc.script_name().to_string(),
        Argument::InstructionLocation(label) => label.clone(),
        Argument::String(text) | Argument::AsciiString(text) => quote(text),
    }
}

pub(crate) fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32))
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::TableEncoding;

    fn test_set() -> InstructionSet {
        InstructionSet::new(vec![
            InstructionType {
                id: 0x01,
                name: "SetValue".into(),
                arguments: vec![ArgumentType::ValueLocation, ArgumentType::U32],
            },
            InstructionType {
                id: 0x02,
                name: "Jump".into(),
                arguments: vec![ArgumentType::InstructionLocation],
            },
            InstructionType {
                id: 0x03,
                name: "LoadScript".into(),
                arguments: vec![ArgumentType::AsciiString],
            },
            InstructionType {
                id: 0x04,
                name: "ShowDialog".into(),
                arguments: vec![ArgumentType::String],
            },
        ])
    }

    fn raw(type_id: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = type_id.to_le_bytes().to_vec();
        out.extend_from_slice(&((payload.len() + 8) as u32).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn reads_raw_instructions_until_stream_ends() {
        let mut buf = raw(0x01, &[2, 0, 0, 0, 7, 0, 0, 0]);
        buf.extend_from_slice(&[0xAA, 0xBB]);

        let (first, next) = RawInstruction::read(&buf, 0).unwrap().unwrap();
        assert_eq!(first.type_id, 1);
        assert_eq!(first.payload.len(), 8);
        assert_eq!(next, 16);
        assert!(RawInstruction::read(&buf, next).unwrap().is_none());
    }

    #[test]
    fn overlong_length_is_truncation() {
        let mut buf = raw(0x01, &[0; 4]);
        buf[4] = 0x40;
        assert!(matches!(
            RawInstruction::read(&buf, 0),
            Err(RandomiserError::TruncatedInstruction { offset: 0 })
        ));
    }

    #[test]
    fn decodes_typed_arguments_and_jump_labels() {
        let set = test_set();
        let enc = TableEncoding::default();

        let buf = raw(0x01, &[2, 0, 0, 0, 0x2A, 0, 0, 0]);
        let (r, _) = RawInstruction::read(&buf, 0).unwrap().unwrap();
        let (insn, labels) = Instruction::decode_checked(&r, &set, &enc).unwrap();
        assert_eq!(
            insn.arguments,
            vec![Argument::ValueLocation(ValueLocation::Constant), Argument::U32(42)]
        );
        assert!(labels.is_empty());

        let buf = raw(0x02, &[0xA4, 0x01, 0, 0]);
        let (r, _) = RawInstruction::read(&buf, 0).unwrap().unwrap();
        let (insn, labels) = Instruction::decode_checked(&r, &set, &enc).unwrap();
        assert_eq!(insn.arguments, vec![Argument::InstructionLocation("0x1a4".into())]);
        assert_eq!(labels.get("0x1a4"), Some(&0x1a4));
        assert_eq!(insn.encode(Some(&labels), &enc).unwrap(), buf);
    }

    #[test]
    fn bad_value_location_is_an_error() {
        let set = test_set();
        let buf = raw(0x01, &[9, 0, 0, 0, 0, 0, 0, 0]);
        let (r, _) = RawInstruction::read(&buf, 0).unwrap().unwrap();
        assert!(matches!(
            Instruction::decode(&r, set.get(1), &TableEncoding::default()),
            Err(RandomiserError::InvalidValueLocation(9))
        ));
    }

    #[test]
    fn ascii_string_is_terminated_and_padded() {
        let set = test_set();
        let enc = TableEncoding::default();
        let insn = Instruction::new(
            set.get(0x03),
            vec![Argument::AsciiString("abcde".into())],
        )
        .unwrap();

        let bytes = insn.encode(None, &enc).unwrap();
        assert_eq!(&bytes[8..], b"abcde\x00\xcc\xcc");
        assert_eq!(read_u32_le(&bytes, 4), 16);

        let (r, _) = RawInstruction::read(&bytes, 0).unwrap().unwrap();
        let (back, _) = Instruction::decode_checked(&r, &set, &enc).unwrap();
        assert_eq!(back, insn);
    }

    #[test]
    fn string_uses_injected_encoding() {
        let set = test_set();
        let enc = TableEncoding::new(vec![(vec![0x0B], 'A')]);
        let insn = Instruction::new(set.get(0x04), vec![Argument::String("AA".into())]).unwrap();

        let bytes = insn.encode(None, &enc).unwrap();
        assert_eq!(&bytes[8..], &[0x0B, 0x0B, 0xFF, 0xCC]);

        let (r, _) = RawInstruction::read(&bytes, 0).unwrap().unwrap();
        let (back, _) = Instruction::decode_checked(&r, &set, &enc).unwrap();
        assert_eq!(back, insn);
    }

    #[test]
    fn unknown_ids_keep_their_bytes() {
        let set = test_set();
        let enc = TableEncoding::default();
        let buf = raw(0x99, &[1, 2, 3]);
        let (r, _) = RawInstruction::read(&buf, 0).unwrap().unwrap();
        let (insn, _) = Instruction::decode_checked(&r, &set, &enc).unwrap();

        assert!(insn.kind.is_unknown());
        assert_eq!(insn.type_id(), 0x99);
        assert_eq!(insn.encode(None, &enc).unwrap(), buf);
        assert_eq!(insn.to_string(), "UNKNOWN      0x99 b\"\\x01\\x02\\x03\"");
    }

    #[test]
    fn unresolved_label_fails_encode() {
        let set = test_set();
        let insn = Instruction::new(
            set.get(0x02),
            vec![Argument::InstructionLocation("missing".into())],
        )
        .unwrap();
        assert!(matches!(
            insn.encode(Some(&Labels::new()), &TableEncoding::default()),
            Err(RandomiserError::UnresolvedLabel(l)) if l == "missing"
        ));
    }

    #[test]
    fn padding_mismatch_is_detected() {
        let set = test_set();
        // Terminator followed by a whole extra word of padding.
        let buf = raw(0x03, b"ab\x00\xcc\xcc\xcc\xcc\xcc");
        let (r, _) = RawInstruction::read(&buf, 0).unwrap().unwrap();
        assert!(matches!(
            Instruction::decode_checked(&r, &set, &TableEncoding::default()),
            Err(RandomiserError::InstructionLengthMismatch { decoded: 16, encoded: 12, .. })
        ));
    }

    #[test]
    fn argument_kinds_are_checked() {
        let set = test_set();
        assert!(Instruction::new(set.get(0x02), vec![Argument::U32(1)]).is_err());
        assert!(Instruction::new(set.get(0x01), vec![]).is_err());
    }

    #[test]
    fn registry_loads_from_json() {
        let set = InstructionSet::from_json_str(
            r#"[{"id": "0xAA", "name": "NopAA", "arguments": []},
                {"id": "0x25", "name": "Jump", "arguments": ["InstructionLocation"]}]"#,
        )
        .unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.by_name("Jump").unwrap().id, 0x25);
        assert_eq!(set.get(0xAA).name, "NopAA");
        assert!(set.get(0x1234).is_unknown());
    }

    #[test]
    fn ascii_string_rejects_unrepresentable_chars() {
        let set = test_set();
        let enc = TableEncoding::default();
        for text in ["\u{100}bc", "a\0b"] {
            let insn =
                Instruction::new(set.get(0x03), vec![Argument::AsciiString(text.into())]).unwrap();
            assert!(matches!(insn.encode(None, &enc), Err(RandomiserError::Encoding(_))));
            assert!(insn.encoded_len(&enc).is_err());
        }

        // Latin-1 range still round-trips byte for byte.
        let insn =
            Instruction::new(set.get(0x03), vec![Argument::AsciiString("caf\u{e9}".into())])
                .unwrap();
        let bytes = insn.encode(None, &enc).unwrap();
        assert_eq!(&bytes[8..], b"caf\xe9\x00\xcc\xcc\xcc");
        let (r, _) = RawInstruction::read(&bytes, 0).unwrap().unwrap();
        let (back, _) = Instruction::decode_checked(&r, &set, &enc).unwrap();
        assert_eq!(back, insn);
    }
}
