pub mod assembler;
pub mod codec;

pub use assembler::{assemble, AssemblyError};
pub use codec::{CodecError, SampleBuffer, NUM_CHANNELS, SAMPLE_RATE};
