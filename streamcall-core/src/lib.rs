pub mod codec;
pub mod head;
pub mod ids;
pub mod metadata;
pub mod options;
pub mod status;
pub mod timeout;

pub use codec::{
    decode_frame, decode_message, decode_message_frame, encode_frame, encode_message,
    encode_message_frame, CodecError, LengthPrefixed, DEFAULT_MAX_MESSAGE_SIZE,
    MAX_FRAME_PAYLOAD,
};
pub use head::{Authority, HeadError, RequestHead};
pub use ids::{CallId, CallIdAllocator};
pub use metadata::{Metadata, MetadataError};
pub use options::CallOptions;
pub use status::{Status, StatusCode, StatusCodeError};
pub use timeout::{GrpcTimeout, TimeoutError};
