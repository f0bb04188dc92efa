//! Builds the two request packets the engine ever sends: "give me your
//! info" to a server, "give me your server list" to a master. Both are
//! fixed byte strings — there is no per-request token to vary.

pub const GETINFO: [u8; 5] = [b'g', b'i', b'e', b'3', 0x00];
pub const GETLIST: [u8; 4] = [b'r', b'e', b'q', b'2'];

pub fn build_info_request() -> Vec<u8> {
    GETINFO.to_vec()
}

pub fn build_list_request() -> Vec<u8> {
    GETLIST.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn getinfo_matches_wire_format() {
        assert_eq!(build_info_request(), vec![b'g', b'i', b'e', b'3', 0x00]);
    }

    #[test]
    fn getlist_matches_wire_format() {
        assert_eq!(build_list_request(), vec![b'r', b'e', b'q', b'2']);
    }
}
