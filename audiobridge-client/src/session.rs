//! Client-authoritative session state.

use audiobridge_protocol::{
    ByteRingBuffer, Command, DEFAULT_SAMPLE_RATE, NUM_PARAMS, NUM_PORTS,
};

/// Everything the engine needs to reconstruct this plugin instance.
///
/// Replayed in full after every (re)connect, so the engine never depends on
/// commands sent before the current socket was opened.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub port: u8,
    pub sample_rate: u32,
    pub params: [f32; NUM_PARAMS],
    pub audio_active: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            port: 0,
            sample_rate: DEFAULT_SAMPLE_RATE,
            params: [0.0; NUM_PARAMS],
            audio_active: false,
        }
    }
}

impl SessionState {
    /// Returns whether `port` is a selectable port id.
    pub fn valid_port(port: u8) -> bool {
        port < NUM_PORTS
    }

    /// Returns whether `index` addresses a bridged parameter.
    pub fn valid_param(index: usize) -> bool {
        index < NUM_PARAMS
    }

    /// Clamps a parameter value to `0.0..=1.0`; NaN becomes 0.
    pub fn clamp_param(value: f32) -> f32 {
        if value.is_nan() {
            0.0
        } else {
            value.clamp(0.0, 1.0)
        }
    }

    /// Brings every field into its wire range: an invalid port becomes 0 and
    /// parameters are clamped. A session built from caller input must pass
    /// through here before it is replayed, or the engine drops the handshake.
    pub fn sanitized(mut self) -> Self {
        if !Self::valid_port(self.port) {
            self.port = 0;
        }
        for value in self.params.iter_mut() {
            *value = Self::clamp_param(*value);
        }
        self
    }

    /// Selects `port`. Returns the command carrying the change, or `None` if
    /// the port is out of range or already selected.
    pub fn set_port(&mut self, port: u8) -> Option<Command<'static>> {
        if !Self::valid_port(port) || self.port == port {
            return None;
        }
        self.port = port;
        Some(Command::PortSet(port))
    }

    pub fn set_sample_rate(&mut self, rate: u32) -> Option<Command<'static>> {
        if self.sample_rate == rate {
            return None;
        }
        self.sample_rate = rate;
        Some(Command::SampleRateSet(rate))
    }

    /// Sets parameter `index` to the clamped `value`. Returns `None` for an
    /// out-of-range index or an unchanged value.
    pub fn set_param(&mut self, index: usize, value: f32) -> Option<Command<'static>> {
        if !Self::valid_param(index) {
            return None;
        }
        let value = Self::clamp_param(value);
        if self.params[index] == value {
            return None;
        }
        self.params[index] = value;
        Some(Command::parameter(index as u8, value))
    }

    pub fn set_audio_active(&mut self, active: bool) -> Option<Command<'static>> {
        if self.audio_active == active {
            return None;
        }
        self.audio_active = active;
        Some(Command::audio_active(active))
    }

    /// Commands replaying this state, in handshake order (HELLO excluded).
    pub fn snapshot(&self) -> impl Iterator<Item = Command<'static>> + '_ {
        std::iter::once(Command::PortSet(self.port))
            .chain(
                self.params
                    .iter()
                    .enumerate()
                    .map(|(i, v)| Command::parameter(i as u8, *v)),
            )
            .chain([
                Command::SampleRateSet(self.sample_rate),
                Command::audio_active(self.audio_active),
            ])
    }

    /// Number of bytes HELLO plus the snapshot occupy on the wire.
    pub fn handshake_len(&self) -> usize {
        Command::Hello.encoded_len() + self.snapshot().map(|c| c.encoded_len()).sum::<usize>()
    }

    /// Writes HELLO followed by the snapshot into `queue`.
    ///
    /// Returns `false` if the queue is too small; nothing is written then.
    pub fn encode_handshake(&self, queue: &mut ByteRingBuffer) -> bool {
        if self.handshake_len() > queue.free() {
            return false;
        }
        // fits as a whole, so every individual push succeeds
        Command::Hello.encode_into(queue);
        for command in self.snapshot() {
            command.encode_into(queue);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiobridge_protocol::{quantize, Decoder, OwnedCommand};
    use proptest::prelude::*;

    #[test]
    fn test_snapshot_order() {
        let state = SessionState {
            port: 3,
            sample_rate: 48_000,
            audio_active: true,
            ..Default::default()
        };
        let commands: Vec<_> = state.snapshot().collect();
        assert_eq!(commands.len(), 1 + NUM_PARAMS + 2);
        assert_eq!(commands[0], Command::PortSet(3));
        assert_eq!(commands[1], Command::ParameterSet { index: 0, value: 0 });
        assert_eq!(commands[NUM_PARAMS], Command::ParameterSet { index: 15, value: 0 });
        assert_eq!(commands[NUM_PARAMS + 1], Command::SampleRateSet(48_000));
        assert_eq!(commands[NUM_PARAMS + 2], Command::AudioActivate);
    }

    #[test]
    fn test_encode_handshake() {
        let mut state = SessionState::default();
        state.params[4] = 1.0;

        let mut queue = ByteRingBuffer::with_capacity(1024);
        assert!(state.encode_handshake(&mut queue));
        assert_eq!(queue.size(), state.handshake_len());

        let mut bytes = Vec::new();
        queue.copy_to(&mut bytes);
        let mut decoder = Decoder::new();
        decoder.extend(&bytes);
        let decoded = decoder.decode_all().unwrap();
        assert_eq!(decoded.len(), 1 + 1 + NUM_PARAMS + 2);
        assert_eq!(decoded[0], Command::Hello);
        assert_eq!(decoded[6], Command::ParameterSet { index: 4, value: 255 });
        assert_eq!(decoded.last().unwrap(), &Command::AudioDeactivate);
    }

    #[test]
    fn test_encode_handshake_too_small() {
        let state = SessionState::default();
        let mut queue = ByteRingBuffer::with_capacity(state.handshake_len() - 1);
        assert!(!state.encode_handshake(&mut queue));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_validation() {
        assert!(SessionState::valid_port(15));
        assert!(!SessionState::valid_port(16));
        assert!(SessionState::valid_param(0));
        assert!(!SessionState::valid_param(NUM_PARAMS));
    }

    #[test]
    fn test_sanitized_repairs_out_of_range_fields() {
        let mut state = SessionState {
            port: 16,
            ..Default::default()
        };
        state.params[0] = 2.0;
        state.params[1] = -1.0;
        state.params[2] = f32::NAN;
        state.params[3] = 0.25;

        let state = state.sanitized();
        assert_eq!(state.port, 0);
        assert_eq!(&state.params[..4], &[1.0, 0.0, 0.0, 0.25]);

        let valid = SessionState {
            port: 15,
            ..Default::default()
        };
        assert_eq!(valid.clone().sanitized(), valid);
    }

    #[test]
    fn test_setters_coalesce_and_validate() {
        let mut state = SessionState::default();
        assert_eq!(state.set_port(16), None);
        assert_eq!(state.set_port(0), None);
        assert_eq!(state.set_port(4), Some(Command::PortSet(4)));
        assert_eq!(state.set_sample_rate(DEFAULT_SAMPLE_RATE), None);
        assert_eq!(state.set_param(NUM_PARAMS, 0.5), None);
        assert_eq!(state.set_param(0, -3.0), None);
        assert_eq!(
            state.set_param(0, 7.0),
            Some(Command::ParameterSet { index: 0, value: 255 })
        );
        assert_eq!(state.set_audio_active(true), Some(Command::AudioActivate));
        assert_eq!(state.set_audio_active(true), None);
    }

    #[derive(Debug, Clone)]
    enum Update {
        Port(u8),
        SampleRate(u32),
        Param(usize, f32),
        AudioActive(bool),
    }

    fn any_update() -> impl Strategy<Value = Update> {
        // small value ranges so repeats, and therefore coalescing, are common
        prop_oneof![
            (0u8..20).prop_map(Update::Port),
            prop::sample::select(vec![22_050u32, 44_100, 48_000, 96_000])
                .prop_map(Update::SampleRate),
            (0usize..18, prop::sample::select(vec![-0.5f32, 0.0, 0.25, 0.5, 1.0, 1.5]))
                .prop_map(|(i, v)| Update::Param(i, v)),
            any::<bool>().prop_map(Update::AudioActive),
        ]
    }

    proptest! {
        #[test]
        fn prop_ready_updates_decode_to_deduplicated_sequence(
            updates in prop::collection::vec(any_update(), 0..64),
        ) {
            let mut state = SessionState::default();
            let mut queue = ByteRingBuffer::with_capacity(4096);

            // independent model of what the engine should see
            let mut port = 0u8;
            let mut rate = DEFAULT_SAMPLE_RATE;
            let mut params = [0.0f32; NUM_PARAMS];
            let mut active = false;
            let mut expected: Vec<OwnedCommand> = Vec::new();

            for update in &updates {
                let command = match *update {
                    Update::Port(p) => {
                        if p < NUM_PORTS && p != port {
                            port = p;
                            expected.push(Command::PortSet(p));
                        }
                        state.set_port(p)
                    }
                    Update::SampleRate(r) => {
                        if r != rate {
                            rate = r;
                            expected.push(Command::SampleRateSet(r));
                        }
                        state.set_sample_rate(r)
                    }
                    Update::Param(i, v) => {
                        let v = v.clamp(0.0, 1.0);
                        if i < NUM_PARAMS && params[i] != v {
                            params[i] = v;
                            expected.push(Command::ParameterSet { index: i as u8, value: quantize(v) });
                        }
                        state.set_param(i, v)
                    }
                    Update::AudioActive(a) => {
                        if a != active {
                            active = a;
                            expected.push(Command::audio_active(a));
                        }
                        state.set_audio_active(a)
                    }
                };
                if let Some(command) = command {
                    prop_assert!(command.encode_into(&mut queue));
                }
            }

            let mut bytes = Vec::new();
            queue.copy_to(&mut bytes);
            let mut decoder = Decoder::after_hello();
            decoder.extend(&bytes);
            prop_assert_eq!(decoder.decode_all().unwrap(), expected);
            prop_assert_eq!(decoder.buffered(), 0);

            prop_assert_eq!(state.port, port);
            prop_assert_eq!(state.sample_rate, rate);
            prop_assert_eq!(state.params, params);
            prop_assert_eq!(state.audio_active, active);
        }
    }
}
