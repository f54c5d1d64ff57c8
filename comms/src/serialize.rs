/// Serialization into a framed send buffer.
///
/// Implementors append their encoded header bytes to `buf` and may return a
/// borrowed tail that the sender writes to the wire as-is, skipping a copy of
/// large numeric payloads.
pub trait Serialize<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}
