// code.rs - message codes for the store's binary request/response protocol
//
// Every frame on the wire carries a one-byte message code right after the
// four-byte length. The code tells the reader which protobuf message the
// payload holds, so a frame can be decoded without any other context.
//
// ============================================================================
// CODE LAYOUT
// ============================================================================
//
// Requests and their responses are paired: the response code is always
// `request + 1`. Code 0 is reserved for the error response, which may be
// sent in reply to any request.
//
//   0        error response (payload: errmsg + errcode)
//   1 - 8    connection housekeeping (ping, client id, server info)
//   9 - 14   object get / put / delete
//   15 - 22  listings and bucket properties
//   23 - 30  MapReduce, secondary index, search, bucket reset
//   50 - 53  legacy counters
//   80 - 83  convergent data types (counter, set, map)
//
// ============================================================================
// ACKNOWLEDGEMENTS WITHOUT PAYLOAD
// ============================================================================
//
// Four response codes never carry a payload. The reader must not try to decode
// them: ping, set-client-id, set-bucket and delete acknowledgements. Reset
// bucket is answered the same way.

/// Error response, may answer any request.
pub const CODE_ERROR_RESP: u8 = 0;
/// Liveness probe.
pub const CODE_PING_REQ: u8 = 1;
/// Liveness acknowledgement (no payload).
pub const CODE_PING_RESP: u8 = 2;
/// Ask for the connection's client id.
pub const CODE_GET_CLIENT_ID_REQ: u8 = 3;
/// Client id reply.
pub const CODE_GET_CLIENT_ID_RESP: u8 = 4;
/// Change the connection's client id.
pub const CODE_SET_CLIENT_ID_REQ: u8 = 5;
/// Client id change acknowledgement (no payload).
pub const CODE_SET_CLIENT_ID_RESP: u8 = 6;
/// Ask for node name and server version.
pub const CODE_GET_SERVER_INFO_REQ: u8 = 7;
/// Node name and server version reply.
pub const CODE_GET_SERVER_INFO_RESP: u8 = 8;
/// Fetch an object.
pub const CODE_GET_REQ: u8 = 9;
/// Object contents, vector clock and unchanged marker.
pub const CODE_GET_RESP: u8 = 10;
/// Store an object.
pub const CODE_PUT_REQ: u8 = 11;
/// Store acknowledgement, optionally with head/body and assigned key.
pub const CODE_PUT_RESP: u8 = 12;
/// Delete an object.
pub const CODE_DEL_REQ: u8 = 13;
/// Delete acknowledgement (no payload).
pub const CODE_DEL_RESP: u8 = 14;
/// List all buckets.
pub const CODE_LIST_BUCKETS_REQ: u8 = 15;
/// One page of bucket names.
pub const CODE_LIST_BUCKETS_RESP: u8 = 16;
/// List all keys of a bucket.
pub const CODE_LIST_KEYS_REQ: u8 = 17;
/// One page of keys; the final page carries `done`.
pub const CODE_LIST_KEYS_RESP: u8 = 18;
/// Fetch bucket properties.
pub const CODE_GET_BUCKET_REQ: u8 = 19;
/// Bucket properties reply.
pub const CODE_GET_BUCKET_RESP: u8 = 20;
/// Change bucket properties.
pub const CODE_SET_BUCKET_REQ: u8 = 21;
/// Bucket property change acknowledgement (no payload).
pub const CODE_SET_BUCKET_RESP: u8 = 22;
/// Run a MapReduce job.
pub const CODE_MAP_RED_REQ: u8 = 23;
/// One streamed MapReduce result; the final frame carries `done`.
pub const CODE_MAP_RED_RESP: u8 = 24;
/// Secondary index query.
pub const CODE_INDEX_REQ: u8 = 25;
/// Secondary index query result.
pub const CODE_INDEX_RESP: u8 = 26;
/// Full-text search query.
pub const CODE_SEARCH_QUERY_REQ: u8 = 27;
/// Full-text search result.
pub const CODE_SEARCH_QUERY_RESP: u8 = 28;
/// Reset bucket properties to defaults.
pub const CODE_RESET_BUCKET_REQ: u8 = 29;
/// Bucket reset acknowledgement (no payload).
pub const CODE_RESET_BUCKET_RESP: u8 = 30;
/// Increment a legacy counter.
pub const CODE_COUNTER_UPDATE_REQ: u8 = 50;
/// Legacy counter update reply.
pub const CODE_COUNTER_UPDATE_RESP: u8 = 51;
/// Read a legacy counter.
pub const CODE_COUNTER_GET_REQ: u8 = 52;
/// Legacy counter value.
pub const CODE_COUNTER_GET_RESP: u8 = 53;
/// Fetch a convergent data type.
pub const CODE_DT_FETCH_REQ: u8 = 80;
/// Data type value and causal context.
pub const CODE_DT_FETCH_RESP: u8 = 81;
/// Apply a delta to a convergent data type.
pub const CODE_DT_UPDATE_REQ: u8 = 82;
/// Data type update reply.
pub const CODE_DT_UPDATE_RESP: u8 = 83;

// ============================================================================
// CODE ENUMERATION
// ============================================================================

/// All message codes understood by the client.
///
/// This enum provides a type-safe way to work with code numbers.
/// Each variant corresponds to one of the CODE_* constants above.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageCode {
    ErrorResp = CODE_ERROR_RESP,
    PingReq = CODE_PING_REQ,
    PingResp = CODE_PING_RESP,
    GetClientIdReq = CODE_GET_CLIENT_ID_REQ,
    GetClientIdResp = CODE_GET_CLIENT_ID_RESP,
    SetClientIdReq = CODE_SET_CLIENT_ID_REQ,
    SetClientIdResp = CODE_SET_CLIENT_ID_RESP,
    GetServerInfoReq = CODE_GET_SERVER_INFO_REQ,
    GetServerInfoResp = CODE_GET_SERVER_INFO_RESP,
    GetReq = CODE_GET_REQ,
    GetResp = CODE_GET_RESP,
    PutReq = CODE_PUT_REQ,
    PutResp = CODE_PUT_RESP,
    DelReq = CODE_DEL_REQ,
    DelResp = CODE_DEL_RESP,
    ListBucketsReq = CODE_LIST_BUCKETS_REQ,
    ListBucketsResp = CODE_LIST_BUCKETS_RESP,
    ListKeysReq = CODE_LIST_KEYS_REQ,
    ListKeysResp = CODE_LIST_KEYS_RESP,
    GetBucketReq = CODE_GET_BUCKET_REQ,
    GetBucketResp = CODE_GET_BUCKET_RESP,
    SetBucketReq = CODE_SET_BUCKET_REQ,
    SetBucketResp = CODE_SET_BUCKET_RESP,
    MapRedReq = CODE_MAP_RED_REQ,
    MapRedResp = CODE_MAP_RED_RESP,
    IndexReq = CODE_INDEX_REQ,
    IndexResp = CODE_INDEX_RESP,
    SearchQueryReq = CODE_SEARCH_QUERY_REQ,
    SearchQueryResp = CODE_SEARCH_QUERY_RESP,
    ResetBucketReq = CODE_RESET_BUCKET_REQ,
    ResetBucketResp = CODE_RESET_BUCKET_RESP,
    CounterUpdateReq = CODE_COUNTER_UPDATE_REQ,
    CounterUpdateResp = CODE_COUNTER_UPDATE_RESP,
    CounterGetReq = CODE_COUNTER_GET_REQ,
    CounterGetResp = CODE_COUNTER_GET_RESP,
    DtFetchReq = CODE_DT_FETCH_REQ,
    DtFetchResp = CODE_DT_FETCH_RESP,
    DtUpdateReq = CODE_DT_UPDATE_REQ,
    DtUpdateResp = CODE_DT_UPDATE_RESP,
}

impl MessageCode {
    /// Convert code to its wire byte
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to create a code from its wire byte
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            CODE_ERROR_RESP => Some(Self::ErrorResp),
            CODE_PING_REQ => Some(Self::PingReq),
            CODE_PING_RESP => Some(Self::PingResp),
            CODE_GET_CLIENT_ID_REQ => Some(Self::GetClientIdReq),
            CODE_GET_CLIENT_ID_RESP => Some(Self::GetClientIdResp),
            CODE_SET_CLIENT_ID_REQ => Some(Self::SetClientIdReq),
            CODE_SET_CLIENT_ID_RESP => Some(Self::SetClientIdResp),
            CODE_GET_SERVER_INFO_REQ => Some(Self::GetServerInfoReq),
            CODE_GET_SERVER_INFO_RESP => Some(Self::GetServerInfoResp),
            CODE_GET_REQ => Some(Self::GetReq),
            CODE_GET_RESP => Some(Self::GetResp),
            CODE_PUT_REQ => Some(Self::PutReq),
            CODE_PUT_RESP => Some(Self::PutResp),
            CODE_DEL_REQ => Some(Self::DelReq),
            CODE_DEL_RESP => Some(Self::DelResp),
            CODE_LIST_BUCKETS_REQ => Some(Self::ListBucketsReq),
            CODE_LIST_BUCKETS_RESP => Some(Self::ListBucketsResp),
            CODE_LIST_KEYS_REQ => Some(Self::ListKeysReq),
            CODE_LIST_KEYS_RESP => Some(Self::ListKeysResp),
            CODE_GET_BUCKET_REQ => Some(Self::GetBucketReq),
            CODE_GET_BUCKET_RESP => Some(Self::GetBucketResp),
            CODE_SET_BUCKET_REQ => Some(Self::SetBucketReq),
            CODE_SET_BUCKET_RESP => Some(Self::SetBucketResp),
            CODE_MAP_RED_REQ => Some(Self::MapRedReq),
            CODE_MAP_RED_RESP => Some(Self::MapRedResp),
            CODE_INDEX_REQ => Some(Self::IndexReq),
            CODE_INDEX_RESP => Some(Self::IndexResp),
            CODE_SEARCH_QUERY_REQ => Some(Self::SearchQueryReq),
            CODE_SEARCH_QUERY_RESP => Some(Self::SearchQueryResp),
            CODE_RESET_BUCKET_REQ => Some(Self::ResetBucketReq),
            CODE_RESET_BUCKET_RESP => Some(Self::ResetBucketResp),
            CODE_COUNTER_UPDATE_REQ => Some(Self::CounterUpdateReq),
            CODE_COUNTER_UPDATE_RESP => Some(Self::CounterUpdateResp),
            CODE_COUNTER_GET_REQ => Some(Self::CounterGetReq),
            CODE_COUNTER_GET_RESP => Some(Self::CounterGetResp),
            CODE_DT_FETCH_REQ => Some(Self::DtFetchReq),
            CODE_DT_FETCH_RESP => Some(Self::DtFetchResp),
            CODE_DT_UPDATE_REQ => Some(Self::DtUpdateReq),
            CODE_DT_UPDATE_RESP => Some(Self::DtUpdateResp),
            _ => None,
        }
    }

    /// Get the protocol name of the message
    pub const fn name(self) -> &'static str {
        match self {
            Self::ErrorResp => "RpbErrorResp",
            Self::PingReq => "RpbPingReq",
            Self::PingResp => "RpbPingResp",
            Self::GetClientIdReq => "RpbGetClientIdReq",
            Self::GetClientIdResp => "RpbGetClientIdResp",
            Self::SetClientIdReq => "RpbSetClientIdReq",
            Self::SetClientIdResp => "RpbSetClientIdResp",
            Self::GetServerInfoReq => "RpbGetServerInfoReq",
            Self::GetServerInfoResp => "RpbGetServerInfoResp",
            Self::GetReq => "RpbGetReq",
            Self::GetResp => "RpbGetResp",
            Self::PutReq => "RpbPutReq",
            Self::PutResp => "RpbPutResp",
            Self::DelReq => "RpbDelReq",
            Self::DelResp => "RpbDelResp",
            Self::ListBucketsReq => "RpbListBucketsReq",
            Self::ListBucketsResp => "RpbListBucketsResp",
            Self::ListKeysReq => "RpbListKeysReq",
            Self::ListKeysResp => "RpbListKeysResp",
            Self::GetBucketReq => "RpbGetBucketReq",
            Self::GetBucketResp => "RpbGetBucketResp",
            Self::SetBucketReq => "RpbSetBucketReq",
            Self::SetBucketResp => "RpbSetBucketResp",
            Self::MapRedReq => "RpbMapRedReq",
            Self::MapRedResp => "RpbMapRedResp",
            Self::IndexReq => "RpbIndexReq",
            Self::IndexResp => "RpbIndexResp",
            Self::SearchQueryReq => "RpbSearchQueryReq",
            Self::SearchQueryResp => "RpbSearchQueryResp",
            Self::ResetBucketReq => "RpbResetBucketReq",
            Self::ResetBucketResp => "RpbResetBucketResp",
            Self::CounterUpdateReq => "RpbCounterUpdateReq",
            Self::CounterUpdateResp => "RpbCounterUpdateResp",
            Self::CounterGetReq => "RpbCounterGetReq",
            Self::CounterGetResp => "RpbCounterGetResp",
            Self::DtFetchReq => "DtFetchReq",
            Self::DtFetchResp => "DtFetchResp",
            Self::DtUpdateReq => "DtUpdateReq",
            Self::DtUpdateResp => "DtUpdateResp",
        }
    }

    /// Check if the code is an acknowledgement that never carries a payload
    pub const fn is_empty_ack(self) -> bool {
        matches!(
            self,
            Self::PingResp
                | Self::SetClientIdResp
                | Self::SetBucketResp
                | Self::DelResp
                | Self::ResetBucketResp
        )
    }

    /// Check if the code is sent by the client
    pub const fn is_request(self) -> bool {
        !matches!(self, Self::ErrorResp) && self.response().is_some()
    }

    /// The response code that answers this request code, if any.
    pub const fn response(self) -> Option<Self> {
        match self {
            Self::PingReq => Some(Self::PingResp),
            Self::GetClientIdReq => Some(Self::GetClientIdResp),
            Self::SetClientIdReq => Some(Self::SetClientIdResp),
            Self::GetServerInfoReq => Some(Self::GetServerInfoResp),
            Self::GetReq => Some(Self::GetResp),
            Self::PutReq => Some(Self::PutResp),
            Self::DelReq => Some(Self::DelResp),
            Self::ListBucketsReq => Some(Self::ListBucketsResp),
            Self::ListKeysReq => Some(Self::ListKeysResp),
            Self::GetBucketReq => Some(Self::GetBucketResp),
            Self::SetBucketReq => Some(Self::SetBucketResp),
            Self::MapRedReq => Some(Self::MapRedResp),
            Self::IndexReq => Some(Self::IndexResp),
            Self::SearchQueryReq => Some(Self::SearchQueryResp),
            Self::ResetBucketReq => Some(Self::ResetBucketResp),
            Self::CounterUpdateReq => Some(Self::CounterUpdateResp),
            Self::CounterGetReq => Some(Self::CounterGetResp),
            Self::DtFetchReq => Some(Self::DtFetchResp),
            Self::DtUpdateReq => Some(Self::DtUpdateResp),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// TESTS
// ============================================================================
