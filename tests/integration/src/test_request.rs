//! Request pipeline end-to-end tests.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use stratus_core::Error;
    use stratus_fs::{Method, Object, ObjectType, Request};

    use crate::{test_context, test_context_with, MockResponse, MockS3};

    #[test]
    fn test_should_populate_target_object_from_head() {
        let server = MockS3::start();
        server.route(
            "HEAD",
            "/test-0/notes.txt",
            MockResponse::ok()
                .with_header("Content-Length", "11")
                .with_header("Content-Type", "text/plain")
                .with_header("ETag", "\"5eb63bbbe01eeed093cb22bb8f5acdc3\"")
                .with_header("x-amz-meta-stratus-mode", "0644")
                .with_header("x-amz-meta-stratus-uid", "500")
                .with_header("x-amz-meta-stratus-mtime", "1700000000")
                .with_header("x-amz-meta-author", "someone"),
        );

        let ctx = test_context(&server);
        let mut req = Request::new(ctx.clone()).unwrap();

        let obj = Object::new_ref(ctx.clone(), "notes.txt");
        req.init(Method::Head).unwrap();
        req.set_target_object(obj.clone());
        req.set_url(&Object::build_url(&ctx, "notes.txt", ObjectType::File), "");
        req.run().unwrap();

        assert_eq!(req.response_code(), 200);

        let obj = obj.lock();
        assert_eq!(obj.object_type(), ObjectType::File);
        assert_eq!(obj.stat().size, 11);
        assert_eq!(obj.stat().mode & !libc::S_IFMT, 0o644);
        assert_eq!(obj.stat().uid, 500);
        assert_eq!(obj.stat().mtime, 1_700_000_000);
        assert_eq!(obj.md5(), "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(
            obj.metadata().get("author").map(String::as_str),
            Some("someone")
        );
        assert!(obj.is_valid());
    }

    #[test]
    fn test_should_send_signed_dated_requests() {
        let server = MockS3::start();
        server.route("HEAD", "/test-0/x", MockResponse::ok());

        let ctx = test_context(&server);
        let mut req = Request::new(ctx).unwrap();

        req.init(Method::Head).unwrap();
        req.set_url("/test-0/x", "");
        req.run().unwrap();

        let seen = server.requests();
        assert_eq!(seen.len(), 1);

        let auth = seen[0].headers.get("authorization").expect("authorization");
        assert!(auth.starts_with("AWS test:"), "unexpected header: {auth}");

        let date = seen[0].headers.get("date").expect("date");
        assert!(date.ends_with("GMT"));
    }

    #[test]
    fn test_should_emit_meta_headers_and_body_on_put() {
        let server = MockS3::start();
        server.route(
            "PUT",
            "/test-0/up",
            MockResponse::ok().with_header("ETag", "\"00112233445566778899aabbccddeeff\""),
        );

        let ctx = test_context(&server);
        let mut obj = Object::new(ctx.clone(), "up");
        obj.set_defaults(ObjectType::File);
        obj.set_mode(0o644);
        obj.set_metadata("custom", "v").unwrap();

        let mut req = Request::new(ctx.clone()).unwrap();
        req.init(Method::Put).unwrap();
        req.set_meta_headers(&obj);
        req.set_url(&Object::build_url(&ctx, "up", ObjectType::File), "");
        req.set_input_data("payload").unwrap();
        req.run().unwrap();

        assert_eq!(req.response_code(), 200);
        assert_eq!(
            req.response_header("etag"),
            Some("\"00112233445566778899aabbccddeeff\"")
        );

        let seen = server.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].body, b"payload");
        assert_eq!(
            seen[0].headers.get("x-amz-meta-custom").map(String::as_str),
            Some("v")
        );
        assert_eq!(
            seen[0]
                .headers
                .get("x-amz-meta-stratus-mode")
                .map(String::as_str),
            Some("0644")
        );
        assert!(seen[0].headers.contains_key("x-amz-meta-stratus-mtime"));
    }

    #[test]
    fn test_should_stream_response_into_file_sink() {
        let server = MockS3::start();
        server.route(
            "GET",
            "/test-0/data",
            MockResponse::ok().with_body("hello world"),
        );

        let ctx = test_context(&server);
        let mut req = Request::new(ctx).unwrap();

        let sink = Arc::new(tempfile::tempfile().unwrap());
        req.init(Method::Get).unwrap();
        req.set_url("/test-0/data", "");
        req.set_output_file(sink.clone(), 3);
        req.run().unwrap();

        assert!(req.output_data().is_empty());

        use std::os::unix::fs::FileExt;
        let mut buf = [0u8; 11];
        sink.read_exact_at(&mut buf, 3).unwrap();
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn test_should_surface_response_codes_without_erroring() {
        let server = MockS3::start();

        let ctx = test_context(&server);
        let mut req = Request::new(ctx).unwrap();

        // No route installed: the endpoint answers 404.
        req.init(Method::Head).unwrap();
        req.set_url("/test-0/absent", "");
        req.run().unwrap();

        assert_eq!(req.response_code(), 404);
    }

    #[test]
    fn test_should_cancel_permanently_on_timeout() {
        let server = MockS3::start();
        server.route("GET", "/test-0/slow", MockResponse::ok().with_body("late"));
        server.set_delay(Duration::from_secs(2));

        let ctx = test_context_with(&server, |config| {
            config.request_timeout_secs = 1;
        });
        let mut req = Request::new(ctx).unwrap();

        req.init(Method::Get).unwrap();
        req.set_url("/test-0/slow", "");

        assert!(matches!(req.run(), Err(Error::Timeout)));
        assert!(req.is_canceled());

        // Canceled requests are terminal.
        assert!(matches!(
            req.init(Method::Get),
            Err(Error::InvalidArgument(_))
        ));
    }
}
