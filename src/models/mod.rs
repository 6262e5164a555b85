mod media;

pub use media::{
    is_hdr_image, ChannelLayout, DecodedImage, ImageFileRef, Thumbnail, HDR_EXTENSIONS,
};
