#![forbid(unsafe_code)]

//! Fixed pool of outgoing request identities.
//!
//! Each retry against the upstream source goes out with a browser-looking
//! header set picked from this table. The pool is immutable; callers pass an
//! explicit index so selection stays a pure lookup.

/// One outgoing header set: user agent plus the accept headers a real
/// browser would send alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIdentity {
    pub user_agent: &'static str,
    pub accept: &'static str,
    pub accept_language: &'static str,
}

const BROWSER_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

/// Header sets mirroring current desktop browsers. Order is irrelevant;
/// selection is by index modulo the pool size.
const POOL: &[ClientIdentity] = &[
    ClientIdentity {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                     (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        accept: BROWSER_ACCEPT,
        accept_language: "en-US,en;q=0.9",
    },
    ClientIdentity {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                     (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
        accept: BROWSER_ACCEPT,
        accept_language: "en-US,en;q=0.8",
    },
    ClientIdentity {
        user_agent: "Mozilla/5.0 (X11; Linux x86_64; rv:132.0) Gecko/20100101 Firefox/132.0",
        accept: BROWSER_ACCEPT,
        accept_language: "en-US,en;q=0.5",
    },
    ClientIdentity {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 \
                     (KHTML, like Gecko) Version/17.6 Safari/605.1.15",
        accept: BROWSER_ACCEPT,
        accept_language: "en-GB,en;q=0.9",
    },
    ClientIdentity {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:131.0) Gecko/20100101 \
                     Firefox/131.0",
        accept: BROWSER_ACCEPT,
        accept_language: "en-US,en;q=0.7",
    },
];

/// Number of identities available for rotation.
pub fn pool_len() -> usize {
    POOL.len()
}

/// Pure selection: any index maps onto the pool by modulo, so callers can
/// feed either a round-robin counter or a random draw.
pub fn pick(index: usize) -> &'static ClientIdentity {
    &POOL[index % POOL.len()]
}
