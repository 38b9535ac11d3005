use chrono::{DateTime, Utc};

pub fn u64_list_pack(ids: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ids.len() * 8);
    for &id in ids {
        out.extend_from_slice(&id.to_le_bytes());
    }
    out
}

pub fn u64_list_unpack(bytes: &[u8]) -> Vec<u64> {
    let mut out = Vec::with_capacity(bytes.len() / 8);
    let mut i = 0;
    while i + 8 <= bytes.len() {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&bytes[i..i + 8]);
        out.push(u64::from_le_bytes(arr));
        i += 8;
    }
    out
}

pub fn datetime_to_micros(t: DateTime<Utc>) -> i64 {
    t.timestamp_micros()
}

pub fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_micros(micros).unwrap_or_default()
}

/// Append a string as u32 LE length + UTF-8 bytes.
pub fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// Cursor over an encoded record. Every read returns None on truncation.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let out = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(out)
    }

    pub fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    pub fn u64(&mut self) -> Option<u64> {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(self.take(8)?);
        Some(u64::from_le_bytes(arr))
    }

    pub fn i64(&mut self) -> Option<i64> {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(self.take(8)?);
        Some(i64::from_le_bytes(arr))
    }

    pub fn str(&mut self) -> Option<&'a str> {
        let mut arr = [0u8; 4];
        arr.copy_from_slice(self.take(4)?);
        let len = u32::from_le_bytes(arr) as usize;
        std::str::from_utf8(self.take(len)?).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u64_list_survives_packing() {
        let ids = [1u64, 7, u64::MAX];
        assert_eq!(u64_list_unpack(&u64_list_pack(&ids)), ids);
        // trailing partial entry is ignored
        let mut packed = u64_list_pack(&ids);
        packed.push(3);
        assert_eq!(u64_list_unpack(&packed), ids);
    }

    #[test]
    fn reader_stops_on_truncation() {
        let mut buf = Vec::new();
        put_str(&mut buf, "hello");
        let mut r = Reader::new(&buf[..6]);
        assert_eq!(r.str(), None);
    }
}
