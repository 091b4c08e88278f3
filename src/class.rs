//! Immutable class descriptors.
//!
//! A class is the shape shared by every object of one kind: which
//! capabilities it carries, how each relates to the class, and a dense
//! capability-index lookup table built at compile time.

use crate::capability::{CAPABILITY_COUNT, Capability, Relation};
use crate::error::{ResonaError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassKind {
    Engine,
    AudioPlayer,
    AudioRecorder,
    OutputMix,
    Listener,
}

impl ClassKind {
    pub const ALL: [ClassKind; 5] = [
        ClassKind::Engine,
        ClassKind::AudioPlayer,
        ClassKind::AudioRecorder,
        ClassKind::OutputMix,
        ClassKind::Listener,
    ];

    pub fn descriptor(self) -> &'static ClassDescriptor {
        match self {
            ClassKind::Engine => &ENGINE_CLASS,
            ClassKind::AudioPlayer => &AUDIO_PLAYER_CLASS,
            ClassKind::AudioRecorder => &AUDIO_RECORDER_CLASS,
            ClassKind::OutputMix => &OUTPUT_MIX_CLASS,
            ClassKind::Listener => &LISTENER_CLASS,
        }
    }
}

/// One capability a class carries, with its relationship tag.
#[derive(Debug, Clone, Copy)]
pub struct ClassEntry {
    pub capability: Capability,
    pub relation: Relation,
}

const fn entry(capability: Capability, relation: Relation) -> ClassEntry {
    ClassEntry {
        capability,
        relation,
    }
}

/// Immutable descriptor shared by all instances of a class.
pub struct ClassDescriptor {
    pub kind: ClassKind,
    pub name: &'static str,
    pub entries: &'static [ClassEntry],
    /// capability index -> entry index, -1 when the class lacks it
    index: [i8; CAPABILITY_COUNT],
}

const fn build_index(entries: &[ClassEntry]) -> [i8; CAPABILITY_COUNT] {
    let mut table = [-1i8; CAPABILITY_COUNT];
    let mut i = 0;
    while i < entries.len() {
        table[entries[i].capability as usize] = i as i8;
        i += 1;
    }
    table
}

impl ClassDescriptor {
    /// Position of a capability in this class's entry list.
    pub fn entry_index(&self, capability: Capability) -> Option<usize> {
        let i = self.index[capability.index()];
        if i < 0 { None } else { Some(i as usize) }
    }

    pub fn entry(&self, capability: Capability) -> Option<&ClassEntry> {
        self.entry_index(capability).map(|i| &self.entries[i])
    }

    pub fn interface_count(&self) -> usize {
        self.entries.len()
    }

    /// Bitmask over entry indices of the capabilities every instance exposes.
    pub(crate) fn implicit_mask(&self) -> u32 {
        let mut mask = 0;
        for (i, e) in self.entries.iter().enumerate() {
            if matches!(e.relation, Relation::Implicit) {
                mask |= 1 << i;
            }
        }
        mask
    }

    /// Builds the exposed mask for a creation request: implicit capabilities
    /// plus everything in `requested`. A requested capability the class does
    /// not carry (or carries as unavailable) fails the whole request.
    pub(crate) fn exposed_mask(&self, requested: &[Capability]) -> Result<u32> {
        let mut mask = self.implicit_mask();
        for &cap in requested {
            match self.entry_index(cap) {
                Some(idx) if !matches!(self.entries[idx].relation, Relation::Unavailable) => {
                    mask |= 1 << idx;
                }
                _ => return Err(ResonaError::FeatureUnsupported),
            }
        }
        Ok(mask)
    }
}

static ENGINE_ENTRIES: [ClassEntry; 1] =
    [entry(Capability::EngineInfo, Relation::Implicit)];

pub static ENGINE_CLASS: ClassDescriptor = ClassDescriptor {
    kind: ClassKind::Engine,
    name: "Engine",
    entries: &ENGINE_ENTRIES,
    index: build_index(&ENGINE_ENTRIES),
};

static AUDIO_PLAYER_ENTRIES: [ClassEntry; 8] = [
    entry(Capability::Play, Relation::Implicit),
    entry(Capability::BufferQueue, Relation::Implicit),
    entry(Capability::Volume, Relation::Implicit),
    entry(Capability::MuteSolo, Relation::Optional),
    entry(Capability::Seek, Relation::Optional),
    entry(Capability::PlaybackRate, Relation::Dynamic),
    entry(Capability::Pitch, Relation::Dynamic),
    entry(Capability::Location, Relation::Dynamic),
];

pub static AUDIO_PLAYER_CLASS: ClassDescriptor = ClassDescriptor {
    kind: ClassKind::AudioPlayer,
    name: "AudioPlayer",
    entries: &AUDIO_PLAYER_ENTRIES,
    index: build_index(&AUDIO_PLAYER_ENTRIES),
};

static AUDIO_RECORDER_ENTRIES: [ClassEntry; 4] = [
    entry(Capability::Record, Relation::Implicit),
    entry(Capability::BufferQueue, Relation::Implicit),
    entry(Capability::Volume, Relation::Optional),
    // spatial capture has no backend in this build
    entry(Capability::Location, Relation::Unavailable),
];

pub static AUDIO_RECORDER_CLASS: ClassDescriptor = ClassDescriptor {
    kind: ClassKind::AudioRecorder,
    name: "AudioRecorder",
    entries: &AUDIO_RECORDER_ENTRIES,
    index: build_index(&AUDIO_RECORDER_ENTRIES),
};

static OUTPUT_MIX_ENTRIES: [ClassEntry; 1] =
    [entry(Capability::MixOutput, Relation::Implicit)];

pub static OUTPUT_MIX_CLASS: ClassDescriptor = ClassDescriptor {
    kind: ClassKind::OutputMix,
    name: "OutputMix",
    entries: &OUTPUT_MIX_ENTRIES,
    index: build_index(&OUTPUT_MIX_ENTRIES),
};

static LISTENER_ENTRIES: [ClassEntry; 1] =
    [entry(Capability::Location, Relation::Implicit)];

pub static LISTENER_CLASS: ClassDescriptor = ClassDescriptor {
    kind: ClassKind::Listener,
    name: "Listener",
    entries: &LISTENER_ENTRIES,
    index: build_index(&LISTENER_ENTRIES),
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_lookup_matches_entry_order() {
        for kind in ClassKind::ALL {
            let class = kind.descriptor();
            for (i, e) in class.entries.iter().enumerate() {
                assert_eq!(class.entry_index(e.capability), Some(i));
            }
            assert_eq!(class.entry_index(Capability::MixOutput).is_some(), kind == ClassKind::OutputMix);
        }
    }

    #[test]
    fn test_exposed_mask_rejects_foreign_and_unavailable() {
        let player = &AUDIO_PLAYER_CLASS;
        assert_eq!(
            player.exposed_mask(&[Capability::MixOutput]),
            Err(ResonaError::FeatureUnsupported)
        );

        let recorder = &AUDIO_RECORDER_CLASS;
        assert_eq!(
            recorder.exposed_mask(&[Capability::Location]),
            Err(ResonaError::FeatureUnsupported)
        );

        let mask = player
            .exposed_mask(&[Capability::MuteSolo, Capability::Seek])
            .unwrap();
        assert_eq!(mask & player.implicit_mask(), player.implicit_mask());
        assert!(mask & (1 << player.entry_index(Capability::MuteSolo).unwrap()) != 0);
        assert!(mask & (1 << player.entry_index(Capability::PlaybackRate).unwrap()) == 0);
    }
}
