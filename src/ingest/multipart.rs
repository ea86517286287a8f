//! Multipart part source
//!
//! Adapts a `multipart/form-data` body into a stream of [`UploadPart`]s for
//! one form field. Only file parts are yielded: parts of other fields and
//! plain form values are skipped without being buffered, as is a file input
//! submitted with nothing selected (`filename=""` and no content).
//!
//! A part must be dropped before the next one is requested; the ingestion
//! loop does that by consuming each part's body as it stores it.
//!
//! An I/O error from the request body is held back and the parser sees a
//! clean end of input instead. Parts that arrived complete are still yielded,
//! and the error is reported against the part that was cut short.

use super::{ByteStream, IngestError, UploadPart};
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{future, StreamExt, TryStreamExt};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Transport failure of the request body
#[derive(Default)]
struct Interruption {
    error: Mutex<Option<io::Error>>,
    reported: AtomicBool,
}

impl Interruption {
    fn hold(&self, error: io::Error) {
        if let Ok(mut slot) = self.error.lock() {
            *slot = Some(error);
        }
    }

    /// Error to report for a parser failure, the held transport error first
    fn resolve(&self, error: multer::Error) -> io::Error {
        let held = self.error.lock().ok().and_then(|mut slot| slot.take());
        match held {
            Some(transport) => {
                self.reported.store(true, Ordering::Release);
                transport
            }
            None => io::Error::other(error),
        }
    }

    fn reported(&self) -> bool {
        self.reported.load(Ordering::Acquire)
    }
}

/// File parts of `body` whose form field name is `field`
pub fn parts(
    body: ByteStream,
    boundary: String,
    field: &str,
) -> BoxStream<'static, Result<UploadPart, IngestError>> {
    let interruption = Arc::new(Interruption::default());
    let held = interruption.clone();
    let body = body.scan((), move |_, chunk| {
        future::ready(match chunk {
            Ok(bytes) => Some(Ok::<_, io::Error>(bytes)),
            Err(e) => {
                debug!(error = %e, "Request body interrupted");
                held.hold(e);
                None
            }
        })
    });
    let multipart = multer::Multipart::new(body, boundary);

    stream::unfold(
        Some((multipart, field.to_string(), interruption)),
        |state| async move {
            let (mut multipart, field, interruption) = state?;
            loop {
                match multipart.next_field().await {
                    Ok(Some(mut part)) => {
                        if part.name() != Some(field.as_str()) {
                            debug!(field = ?part.name(), "Skipping multipart field");
                            continue;
                        }
                        let Some(declared_name) = part.file_name().map(str::to_string) else {
                            debug!(field = %field, "Skipping form value without a file name");
                            continue;
                        };

                        let failure = interruption.clone();
                        let rest = move |part: multer::Field<'static>| {
                            part.map_err(move |e| failure.resolve(e)).boxed()
                        };
                        let body: ByteStream = if declared_name.is_empty() {
                            match first_chunk(&mut part).await {
                                Ok(None) => {
                                    debug!(field = %field, "Skipping file input with nothing selected");
                                    continue;
                                }
                                Ok(Some(first)) => stream::once(future::ready(Ok(first)))
                                    .chain(rest(part))
                                    .boxed(),
                                Err(e) => {
                                    let error = interruption.resolve(e);
                                    stream::once(future::ready(Err(error))).boxed()
                                }
                            }
                        } else {
                            rest(part)
                        };

                        let upload = UploadPart {
                            field: Some(field.clone()),
                            declared_name: Some(declared_name),
                            body,
                        };
                        return Some((Ok(upload), Some((multipart, field, interruption))));
                    }
                    Ok(None) => return None,
                    Err(_) if interruption.reported() => {
                        // Already attributed to the part it cut short
                        return None;
                    }
                    Err(e) => {
                        let error = IngestError::Io(interruption.resolve(e));
                        return Some((Err(error), None));
                    }
                }
            }
        },
    )
    .boxed()
}

/// First non-empty chunk of `part`, `None` if it has no content
async fn first_chunk(part: &mut multer::Field<'static>) -> multer::Result<Option<Bytes>> {
    loop {
        match part.chunk().await? {
            Some(chunk) if chunk.is_empty() => continue,
            other => return Ok(other),
        }
    }
}
