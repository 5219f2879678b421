//! NNTP response types and status codes

/// NNTP response with status code, message, and optional multi-line body
#[derive(Debug, Clone)]
pub struct NntpResponse {
    /// 3-digit NNTP response code
    pub code: u16,
    /// Status message from server
    pub message: String,
    /// Multi-line response body (empty for single-line responses)
    pub lines: Vec<String>,
}

/// NNTP binary response optimized for article fetching
///
/// Unlike `NntpResponse` which stores lines as strings, this type stores
/// the raw binary data directly. Articles pass straight from the wire into
/// the spool, so avoiding line-by-line allocations and UTF-8 validation
/// matters on large bodies.
#[derive(Debug, Clone)]
pub struct NntpBinaryResponse {
    /// 3-digit NNTP response code
    pub code: u16,
    /// Status message from server
    pub message: String,
    /// Raw binary response body (with dot-stuffing already removed)
    pub data: Vec<u8>,
}

impl NntpBinaryResponse {
    /// Check if response indicates success (2xx)
    pub fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// Check if response indicates error (4xx or 5xx)
    pub fn is_error(&self) -> bool {
        self.code >= 400
    }
}

impl NntpResponse {
    /// Check if response indicates success (2xx)
    pub fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// Check if response indicates continuation (3xx)
    pub fn is_continuation(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    /// Check if response indicates error (4xx or 5xx)
    pub fn is_error(&self) -> bool {
        self.code >= 400
    }
}

/// NNTP response codes (RFC 3977) consumed by the relay
#[allow(dead_code)]
pub mod codes {
    // 1xx - Informational
    /// Server date/time (RFC 3977 Section 7.1)
    pub const SERVER_DATE: u16 = 111;

    // 2xx - Success
    /// Server ready, posting allowed
    pub const READY_POSTING_ALLOWED: u16 = 200;
    /// Server ready, no posting
    pub const READY_NO_POSTING: u16 = 201;
    /// Closing connection
    pub const CLOSING_CONNECTION: u16 = 205;
    /// Group selected
    pub const GROUP_SELECTED: u16 = 211;
    /// List of newsgroups follows (RFC 3977 Section 7.6)
    pub const LIST_INFORMATION_FOLLOWS: u16 = 215;
    /// Article follows
    pub const ARTICLE_FOLLOWS: u16 = 220;
    /// Head follows
    pub const HEAD_FOLLOWS: u16 = 221;
    /// Body follows
    pub const BODY_FOLLOWS: u16 = 222;
    /// Article stat
    pub const ARTICLE_STAT: u16 = 223;
    /// Overview information follows
    pub const OVERVIEW_INFO_FOLLOWS: u16 = 224;
    /// List of new newsgroups follows (RFC 3977 Section 7.3)
    pub const NEW_NEWSGROUPS_FOLLOW: u16 = 231;
    /// Article posted successfully (RFC 3977 Section 6.3.1)
    pub const ARTICLE_POSTED: u16 = 240;
    /// Authentication accepted
    pub const AUTH_ACCEPTED: u16 = 281;

    // 3xx - Continuation
    /// Send article to be posted
    pub const SEND_ARTICLE: u16 = 340;
    /// Continue with authentication
    pub const AUTH_CONTINUE: u16 = 381;

    // 4xx - Temporary errors
    /// Service temporarily unavailable
    pub const SERVICE_UNAVAILABLE: u16 = 400;
    /// No such newsgroup
    pub const NO_SUCH_GROUP: u16 = 411;
    /// No newsgroup selected
    pub const NO_GROUP_SELECTED: u16 = 412;
    /// No current article
    pub const NO_CURRENT_ARTICLE: u16 = 420;
    /// No article with that number
    pub const NO_SUCH_ARTICLE_NUMBER: u16 = 423;
    /// No article with that message-id
    pub const NO_SUCH_ARTICLE_ID: u16 = 430;
    /// Posting not permitted (RFC 3977 Section 6.3.1)
    pub const POSTING_NOT_PERMITTED: u16 = 440;
    /// Posting failed (RFC 3977 Section 6.3.1)
    pub const POSTING_FAILED: u16 = 441;
    /// Authentication required (RFC 4643)
    pub const AUTH_REQUIRED: u16 = 480;
    /// Authentication rejected
    pub const AUTH_REJECTED: u16 = 481;

    // 5xx - Permanent errors
    /// Command not recognized
    pub const COMMAND_NOT_RECOGNIZED: u16 = 500;
    /// Command syntax error
    pub const COMMAND_SYNTAX_ERROR: u16 = 501;
    /// Access denied / command unavailable
    pub const ACCESS_DENIED: u16 = 502;
    /// Feature not supported / optional functionality absent (RFC 3977)
    pub const FEATURE_NOT_SUPPORTED: u16 = 503;
}
