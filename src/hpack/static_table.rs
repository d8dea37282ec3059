//! HPACK static table (RFC 7541 Appendix A).
//!
//! Wire indices 1..=61 map to array positions 0..61. The table is a
//! process-wide constant; its reverse lookups are built once on first use.

use std::collections::HashMap;
use std::sync::LazyLock;

use super::table::Match;

/// Number of static entries; dynamic indices start right after.
pub const STATIC_LEN: usize = 61;

pub static STATIC_TABLE: [(&[u8], &[u8]); STATIC_LEN] = [
    (b":authority", b""),                               //  1
    (b":method", b"GET"),                               //  2
    (b":method", b"POST"),                              //  3
    (b":path", b"/"),                                   //  4
    (b":path", b"/index.html"),                         //  5
    (b":scheme", b"http"),                              //  6
    (b":scheme", b"https"),                             //  7
    (b":status", b"200"),                               //  8
    (b":status", b"204"),                               //  9
    (b":status", b"206"),                               // 10
    (b":status", b"304"),                               // 11
    (b":status", b"400"),                               // 12
    (b":status", b"404"),                               // 13
    (b":status", b"500"),                               // 14
    (b"accept-charset", b""),                           // 15
    (b"accept-encoding", b"gzip, deflate"),             // 16
    (b"accept-language", b""),                          // 17
    (b"accept-ranges", b""),                            // 18
    (b"accept", b""),                                   // 19
    (b"access-control-allow-origin", b""),              // 20
    (b"age", b""),                                      // 21
    (b"allow", b""),                                    // 22
    (b"authorization", b""),                            // 23
    (b"cache-control", b""),                            // 24
    (b"content-disposition", b""),                      // 25
    (b"content-encoding", b""),                         // 26
    (b"content-language", b""),                         // 27
    (b"content-length", b""),                           // 28
    (b"content-location", b""),                         // 29
    (b"content-range", b""),                            // 30
    (b"content-type", b""),                             // 31
    (b"cookie", b""),                                   // 32
    (b"date", b""),                                     // 33
    (b"etag", b""),                                     // 34
    (b"expect", b""),                                   // 35
    (b"expires", b""),                                  // 36
    (b"from", b""),                                     // 37
    (b"host", b""),                                     // 38
    (b"if-match", b""),                                 // 39
    (b"if-modified-since", b""),                        // 40
    (b"if-none-match", b""),                            // 41
    (b"if-range", b""),                                 // 42
    (b"if-unmodified-since", b""),                      // 43
    (b"last-modified", b""),                            // 44
    (b"link", b""),                                     // 45
    (b"location", b""),                                 // 46
    (b"max-forwards", b""),                             // 47
    (b"proxy-authenticate", b""),                       // 48
    (b"proxy-authorization", b""),                      // 49
    (b"range", b""),                                    // 50
    (b"referer", b""),                                  // 51
    (b"refresh", b""),                                  // 52
    (b"retry-after", b""),                              // 53
    (b"server", b""),                                   // 54
    (b"set-cookie", b""),                               // 55
    (b"strict-transport-security", b""),                // 56
    (b"transfer-encoding", b""),                        // 57
    (b"user-agent", b""),                               // 58
    (b"vary", b""),                                     // 59
    (b"via", b""),                                      // 60
    (b"www-authenticate", b""),                         // 61
];

/// Name -> `(value, index)` rows in table order.
static BY_NAME: LazyLock<HashMap<&'static [u8], Vec<(&'static [u8], u64)>>> = LazyLock::new(|| {
    let mut by_name: HashMap<&'static [u8], Vec<(&'static [u8], u64)>> = HashMap::new();
    for (i, &(name, value)) in STATIC_TABLE.iter().enumerate() {
        by_name.entry(name).or_default().push((value, i as u64 + 1));
    }
    by_name
});

/// Entry at a 1-based wire index.
pub fn get(index: u64) -> Option<(&'static [u8], &'static [u8])> {
    let i = usize::try_from(index).ok()?.checked_sub(1)?;
    STATIC_TABLE.get(i).copied()
}

/// Look up a (name, value) pair, preferring an exact match.
pub fn lookup(name: &[u8], value: &[u8]) -> Match {
    let Some(rows) = BY_NAME.get(name) else {
        return Match::None;
    };
    match rows.iter().find(|(v, _)| *v == value) {
        Some(&(_, index)) => Match::Exact(index),
        None => Match::Name(rows[0].1),
    }
}
