pub mod resolver;

pub use resolver::{
    MediaResolver, NON_IMAGE_DOCUMENT_GUIDANCE, ResolvedMedia, UNREADABLE_IMAGE_GUIDANCE,
    is_image_document,
};
