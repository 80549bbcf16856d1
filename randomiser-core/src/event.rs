use std::collections::BTreeMap;

use log::{debug, warn};

use crate::encoding::CharacterEncoding;
use crate::instruction::{Instruction, InstructionSet, Labels, RawInstruction};
use crate::script::{Script, ScriptEntry};
use crate::{RandomiserError, Result};

pub const EVENT_MAGIC: [u8; 4] = *b"SCR\0";
/// Magic plus leading data; instructions start here.
pub const EVENT_CODE_START: usize = 0x1004;
pub const EVENT_DATA_SIZE: usize = EVENT_CODE_START - EVENT_MAGIC.len();

/// A decoded `.evt` event script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub data: Vec<u8>,
    pub instructions: Vec<Instruction>,
    pub labels: Labels,
}

impl Event {
    pub fn from_binary(
        raw: &[u8],
        set: &InstructionSet,
        encoding: &dyn CharacterEncoding,
    ) -> Result<Self> {
        if raw.len() < EVENT_CODE_START {
            return Err(RandomiserError::MalformedRecordStream {
                what: "event header",
                expected: EVENT_CODE_START,
                actual: raw.len(),
            });
        }
        if raw[..4] != EVENT_MAGIC {
            warn!("Event has unexpected magic {:02x?}", &raw[..4]);
        }

        let data = raw[EVENT_MAGIC.len()..EVENT_CODE_START].to_vec();
        let code = &raw[EVENT_CODE_START..];

        let mut instructions = Vec::new();
        let mut labels = Labels::new();
        let mut offset = 0usize;
        while let Some((raw_insn, next)) = RawInstruction::read(code, offset).map_err(|e| {
            RandomiserError::InstructionDecode {
                offset: EVENT_CODE_START + offset,
                source: Box::new(e),
            }
        })? {
            let (instruction, new_labels) = Instruction::decode_checked(&raw_insn, set, encoding)
                .map_err(|e| RandomiserError::InstructionDecode {
                    offset: EVENT_CODE_START + offset,
                    source: Box::new(e),
                })?;
            instructions.push(instruction);
            labels.extend(new_labels);
            offset = next;
        }

        if offset < code.len() {
            debug!("Ignoring {} trailing bytes after last instruction", code.len() - offset);
        }

        Ok(Event {
            data,
            instructions,
            labels,
        })
    }

    pub fn to_binary(&self, encoding: &dyn CharacterEncoding) -> Result<Vec<u8>> {
        if self.data.len() != EVENT_DATA_SIZE {
            return Err(RandomiserError::MalformedRecordStream {
                what: "event leading data",
                expected: EVENT_DATA_SIZE,
                actual: self.data.len(),
            });
        }

        let mut out = Vec::with_capacity(EVENT_CODE_START);
        out.extend_from_slice(&EVENT_MAGIC);
        out.extend_from_slice(&self.data);
        for instruction in &self.instructions {
            out.extend_from_slice(&instruction.encode(Some(&self.labels), encoding)?);
        }
        Ok(out)
    }

    /// Code-area offset of each instruction, plus the end offset.
    pub fn instruction_offsets(&self, encoding: &dyn CharacterEncoding) -> Result<Vec<u32>> {
        let mut offsets = Vec::with_capacity(self.instructions.len() + 1);
        let mut position = 0u32;
        for instruction in &self.instructions {
            offsets.push(position);
            position += instruction.encoded_len(encoding)? as u32;
        }
        offsets.push(position);
        Ok(offsets)
    }

    /// Instruction starting at a file-relative pointer, if any.
    pub fn instruction_at(
        &self,
        pointer: u32,
        encoding: &dyn CharacterEncoding,
    ) -> Result<Option<&Instruction>> {
        let Some(target) = (pointer as usize).checked_sub(EVENT_CODE_START) else {
            return Ok(None);
        };
        let offsets = self.instruction_offsets(encoding)?;
        Ok(offsets
            .iter()
            .zip(self.instructions.iter())
            .find(|(&offset, _)| offset as usize == target)
            .map(|(_, instruction)| instruction))
    }

    /// Interleave label markers with the instructions they point at.
    pub fn to_script(&self, encoding: &dyn CharacterEncoding) -> Result<Script> {
        let mut by_position: BTreeMap<u32, Vec<&str>> = BTreeMap::new();
        for (name, &position) in &self.labels {
            by_position.entry(position).or_default().push(name);
        }

        let offsets = self.instruction_offsets(encoding)?;
        let mut entries = Vec::with_capacity(self.instructions.len() + self.labels.len());
        let mut placed = 0usize;
        for (i, &position) in offsets.iter().enumerate() {
            if let Some(names) = by_position.remove(&position) {
                for name in names {
                    entries.push(ScriptEntry::Label(name.to_string()));
                    placed += 1;
                }
            }
            if let Some(instruction) = self.instructions.get(i) {
                entries.push(ScriptEntry::Instruction(instruction.clone()));
            }
        }

        if let Some((&position, names)) = by_position.iter().next() {
            return Err(RandomiserError::LabelBoundaryMismatch {
                label: names[0].to_string(),
                offset: position,
            });
        }
        debug_assert_eq!(placed, self.labels.len());

        Ok(Script {
            data: self.data.clone(),
            entries,
        })
    }
}

/// Point every `ShowDialog` at the no-op type, keeping its arguments so the
/// size and every jump target stay where they were.
pub fn silence_dialogue(event: &mut Event, set: &InstructionSet, nop_id: u32) -> usize {
    let mut replaced = 0usize;
    for instruction in &mut event.instructions {
        if instruction.name() != "ShowDialog" {
            continue;
        }
        let mut nop = (*set.get(nop_id)).clone();
        nop.id = nop_id;
        nop.arguments = instruction.kind.arguments.clone();
        if nop.is_unknown() {
            nop.name = format!("Nop{:X}", nop_id);
        }
        instruction.kind = std::sync::Arc::new(nop);
        replaced += 1;
    }
    replaced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::TableEncoding;
    use crate::instruction::{Argument, ArgumentType, InstructionType, ValueLocation};
    use pretty_assertions::assert_eq;

    fn set() -> InstructionSet {
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
                id: 0x04,
                name: "ShowDialog".into(),
                arguments: vec![ArgumentType::String],
            },
        ])
    }

    fn insn(id: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = id.to_le_bytes().to_vec();
        out.extend_from_slice(&((payload.len() + 8) as u32).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    /// Jump (12 bytes) over a SetValue (16 bytes) to a dialog at 0x1c.
    fn sample_event() -> Vec<u8> {
        let mut raw = EVENT_MAGIC.to_vec();
        let mut data = vec![0u8; EVENT_DATA_SIZE];
        data[0] = 0x11;
        data[EVENT_DATA_SIZE - 1] = 0x22;
        raw.extend_from_slice(&data);
        raw.extend(insn(0x02, &0x1cu32.to_le_bytes()));
        raw.extend(insn(0x01, &[1, 0, 0, 0, 5, 0, 0, 0]));
        raw.extend(insn(0x04, &[0x10, 0x11, 0xFF, 0xCC]));
        raw.extend(insn(0x77, &[0xDE, 0xAD]));
        raw
    }

    #[test]
    fn binary_round_trip() {
        let enc = TableEncoding::default();
        let raw = sample_event();
        let event = Event::from_binary(&raw, &set(), &enc).unwrap();

        assert_eq!(event.instructions.len(), 4);
        assert_eq!(event.labels.get("0x1c"), Some(&0x1c));
        assert_eq!(
            event.instructions[1].arguments,
            vec![Argument::ValueLocation(ValueLocation::One), Argument::U32(5)]
        );
        assert_eq!(event.to_binary(&enc).unwrap(), raw);
    }

    #[test]
    fn short_header_is_malformed() {
        let enc = TableEncoding::default();
        assert!(matches!(
            Event::from_binary(&[0u8; 16], &set(), &enc),
            Err(RandomiserError::MalformedRecordStream { .. })
        ));
    }

    #[test]
    fn decode_errors_carry_the_file_offset() {
        let enc = TableEncoding::default();
        let mut raw = sample_event();
        // Corrupt the SetValue pool selector.
        raw[EVENT_CODE_START + 12 + 8] = 7;
        match Event::from_binary(&raw, &set(), &enc) {
            Err(RandomiserError::InstructionDecode { offset, source }) => {
                assert_eq!(offset, EVENT_CODE_START + 12);
                assert!(matches!(*source, RandomiserError::InvalidValueLocation(7)));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn script_places_label_before_target() {
        let enc = TableEncoding::default();
        let event = Event::from_binary(&sample_event(), &set(), &enc).unwrap();
        let script = event.to_script(&enc).unwrap();

        assert_eq!(script.entries.len(), 5);
        assert!(matches!(&script.entries[2], ScriptEntry::Label(l) if l == "0x1c"));
        assert!(matches!(&script.entries[3], ScriptEntry::Instruction(i) if i.name() == "ShowDialog"));
        assert_eq!(script.to_event(&enc).unwrap(), event);
    }

    #[test]
    fn label_inside_an_instruction_is_rejected() {
        let enc = TableEncoding::default();
        let mut event = Event::from_binary(&sample_event(), &set(), &enc).unwrap();
        event.labels.insert("middle".into(), 0x0e);
        assert!(matches!(
            event.to_script(&enc),
            Err(RandomiserError::LabelBoundaryMismatch { offset: 0x0e, .. })
        ));
    }

    #[test]
    fn label_at_end_of_code_is_kept() {
        let enc = TableEncoding::default();
        let mut event = Event::from_binary(&sample_event(), &set(), &enc).unwrap();
        let end = *event.instruction_offsets(&enc).unwrap().last().unwrap();
        event.labels.insert("end".into(), end);

        let script = event.to_script(&enc).unwrap();
        assert!(matches!(script.entries.last(), Some(ScriptEntry::Label(l)) if l == "end"));
        assert_eq!(script.to_event(&enc).unwrap(), event);
    }

    #[test]
    fn finds_instruction_by_file_pointer() {
        let enc = TableEncoding::default();
        let event = Event::from_binary(&sample_event(), &set(), &enc).unwrap();
        let found = event.instruction_at((EVENT_CODE_START + 0x0c) as u32, &enc).unwrap();
        assert_eq!(found.map(|i| i.name()), Some("SetValue"));
        assert!(event.instruction_at(0x10, &enc).unwrap().is_none());
        assert!(event.instruction_at((EVENT_CODE_START + 2) as u32, &enc).unwrap().is_none());
    }

    #[test]
    fn silencing_dialogue_keeps_size() {
        let enc = TableEncoding::default();
        let raw = sample_event();
        let mut event = Event::from_binary(&raw, &set(), &enc).unwrap();

        assert_eq!(silence_dialogue(&mut event, &set(), 0xAA), 1);
        let out = event.to_binary(&enc).unwrap();
        assert_eq!(out.len(), raw.len());
        assert_eq!(event.instructions[2].type_id(), 0xAA);
        assert_eq!(event.instructions[2].name(), "NopAA");
        assert_eq!(&out[EVENT_CODE_START + 28..EVENT_CODE_START + 32], &0xAAu32.to_le_bytes());
    }
}
