//! MIME types by file extension.
//!
//! Renderers pick decoders from the Content-Type header, so the mapping only
//! needs to cover formats worth casting. Anything unknown is served as
//! `application/octet-stream` and left to the renderer to sniff.

pub fn mime_for_filename(filename: &str) -> &'static str {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .unwrap_or("");

    match extension.to_ascii_lowercase().as_str() {
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        "ogg" | "oga" => "audio/ogg",
        "aac" => "audio/aac",
        "m4a" => "audio/mp4",
        "opus" => "audio/opus",
        "wma" => "audio/x-ms-wma",
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "mpg" | "mpeg" => "video/mpeg",
        "ts" => "video/mp2t",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_media_extensions_resolve() {
        assert_eq!(mime_for_filename("song.mp3"), "audio/mpeg");
        assert_eq!(mime_for_filename("album.FLAC"), "audio/flac");
        assert_eq!(mime_for_filename("movie.mkv"), "video/x-matroska");
        assert_eq!(mime_for_filename("cover.jpg"), "image/jpeg");
    }

    #[test]
    fn unknown_and_missing_extensions_fall_back() {
        assert_eq!(mime_for_filename("data.xyz"), "application/octet-stream");
        assert_eq!(mime_for_filename("noextension"), "application/octet-stream");
    }
}
