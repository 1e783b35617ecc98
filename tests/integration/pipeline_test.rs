// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::mock_engines::{
    MockDetectionEngine, MockOcrEngine, MockRenderEngine, ProviderStep, RecordingNlpEngine,
    RenderStep,
};
use super::helpers::{png_bytes, test_policy, ARTICLE_HTML};
use scrapevision::domain::models::scrape_record::ScrapeStatus;
use scrapevision::domain::models::scrape_request::{ScrapeRequest, StageKind};
use scrapevision::domain::models::stage_result::{
    StagePayload, StageResult, SKIP_CANCELLED, SKIP_NO_SCREENSHOT, SKIP_UPSTREAM_RENDER_FAILED,
};
use scrapevision::engines::factory::Providers;
use scrapevision::pipeline::cancel::CancelHandle;
use scrapevision::pipeline::orchestrator::PipelineOrchestrator;
use scrapevision::utils::errors::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

fn labels(entities: &[scrapevision::domain::models::stage_result::Entity]) -> Vec<&str> {
    entities.iter().map(|e| e.label.as_str()).collect()
}

#[tokio::test]
async fn test_pipeline_completes_without_screenshot() {
    let render = Arc::new(MockRenderEngine::always(RenderStep::Page(
        ARTICLE_HTML.to_string(),
    )));
    let ocr = Arc::new(MockOcrEngine::returning("unused"));
    let nlp = Arc::new(RecordingNlpEngine::new());
    let orchestrator = PipelineOrchestrator::new(
        Providers::new(render.clone())
            .with_ocr(ocr.clone())
            .with_nlp(nlp.clone()),
    );
    let policy = test_policy().build().unwrap();

    let request = ScrapeRequest::new("https://example.com/report").with_screenshot(false);
    let record = orchestrator.run(&request, &policy).await;

    assert_eq!(record.status(), ScrapeStatus::Completed);
    assert_eq!(render.screenshot_flags(), vec![false]);

    let rendered = record.stage(StageKind::Render).unwrap();
    assert_eq!(rendered.attempts, 1);
    match rendered.result.payload() {
        Some(StagePayload::Render(page)) => {
            assert_eq!(page.title.as_deref(), Some("Quarterly Report"));
            assert!(page.text.contains("Acme Corp grew revenue"));
            assert_eq!(page.links.len(), 1);
        }
        other => panic!("unexpected render payload: {:?}", other),
    }

    let vision = record.result(StageKind::Vision).unwrap();
    assert_eq!(vision.skip_reason(), Some(SKIP_NO_SCREENSHOT));
    assert_eq!(ocr.calls(), 0);

    match record.result(StageKind::Nlp).unwrap().payload() {
        Some(StagePayload::Nlp(nlp_payload)) => {
            let page = nlp_payload.page.as_ref().unwrap();
            let found = labels(&page.entities);
            assert!(found.contains(&"MONEY"));
            assert!(found.contains(&"PERCENT"));
            assert!(found.contains(&"DATE"));
            assert!(nlp_payload.ocr.is_none());
        }
        other => panic!("unexpected nlp payload: {:?}", other),
    }
    assert_eq!(nlp.inputs().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_render_timeout_exhausts_retries() {
    let render = Arc::new(MockRenderEngine::always(RenderStep::Hang));
    let nlp = Arc::new(RecordingNlpEngine::new());
    let orchestrator =
        PipelineOrchestrator::new(Providers::new(render.clone()).with_nlp(nlp.clone()));
    let policy = test_policy().build().unwrap();

    let record = orchestrator
        .run(&ScrapeRequest::new("https://slow.example.com"), &policy)
        .await;

    let rendered = record.stage(StageKind::Render).unwrap();
    // One initial attempt plus three retries
    assert_eq!(rendered.attempts, 4);
    assert_eq!(render.calls(), 4);
    assert_eq!(rendered.result.error_kind(), Some(ErrorKind::RenderTimeout));
    // 4 timeouts of 1s plus backoff of 100 + 200 + 400 ms
    assert_eq!(rendered.duration_ms, 4700);

    for stage in [StageKind::Vision, StageKind::Nlp] {
        assert_eq!(
            record.result(stage).unwrap().skip_reason(),
            Some(SKIP_UPSTREAM_RENDER_FAILED)
        );
    }
    assert!(nlp.inputs().is_empty());
    assert_eq!(record.status(), ScrapeStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_render_times_out_three_times_with_two_retries() {
    let render = Arc::new(MockRenderEngine::always(RenderStep::Hang));
    let orchestrator = PipelineOrchestrator::new(Providers::new(render.clone()));
    let policy = test_policy().retry_attempts(2).build().unwrap();

    let record = orchestrator
        .run(&ScrapeRequest::new("https://slow.example.com"), &policy)
        .await;

    // retry_attempts counts retries after the first attempt
    let rendered = record.stage(StageKind::Render).unwrap();
    assert_eq!(rendered.attempts, 3);
    assert_eq!(render.calls(), 3);
    assert_eq!(rendered.result.error_kind(), Some(ErrorKind::RenderTimeout));
    assert_eq!(rendered.duration_ms, 3000 + 100 + 200);
    assert_eq!(record.status(), ScrapeStatus::Failed);
}

#[tokio::test]
async fn test_missing_screenshot_keeps_pipeline_completed() {
    // A provider that could not capture the screenshot still returns the HTML
    let render = Arc::new(MockRenderEngine::always(RenderStep::Page(
        ARTICLE_HTML.to_string(),
    )));
    let ocr = Arc::new(MockOcrEngine::returning("unused"));
    let nlp = Arc::new(RecordingNlpEngine::new());
    let orchestrator = PipelineOrchestrator::new(
        Providers::new(render.clone())
            .with_ocr(ocr.clone())
            .with_nlp(nlp.clone()),
    );
    let policy = test_policy().build().unwrap();

    let record = orchestrator
        .run(
            &ScrapeRequest::new("https://example.com/report").with_screenshot(true),
            &policy,
        )
        .await;

    assert_eq!(render.screenshot_flags(), vec![true]);
    assert!(record.result(StageKind::Render).unwrap().is_success());
    assert_eq!(
        record.result(StageKind::Vision).unwrap().skip_reason(),
        Some(SKIP_NO_SCREENSHOT)
    );
    assert_eq!(ocr.calls(), 0);
    assert!(record.result(StageKind::Nlp).unwrap().is_success());
    assert_eq!(record.status(), ScrapeStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_request_overrides_timeout_and_retries() {
    let render = Arc::new(MockRenderEngine::always(RenderStep::Hang));
    let orchestrator = PipelineOrchestrator::new(Providers::new(render.clone()));
    let policy = test_policy().build().unwrap();

    let request = ScrapeRequest::new("https://slow.example.com")
        .with_timeout(Duration::from_millis(250))
        .with_retries(1);
    let record = orchestrator.run(&request, &policy).await;

    let rendered = record.stage(StageKind::Render).unwrap();
    assert_eq!(rendered.attempts, 2);
    assert_eq!(rendered.duration_ms, 250 + 100 + 250);
}

#[tokio::test(start_paused = true)]
async fn test_transient_render_failure_recovers() {
    let render = Arc::new(MockRenderEngine::sequence(
        vec![RenderStep::TransientError, RenderStep::TransientError],
        RenderStep::Page(ARTICLE_HTML.to_string()),
    ));
    let orchestrator = PipelineOrchestrator::new(Providers::new(render.clone()));
    let policy = test_policy().build().unwrap();

    let request = ScrapeRequest::new("https://flaky.example.com").with_stages([StageKind::Render]);
    let record = orchestrator.run(&request, &policy).await;

    let rendered = record.stage(StageKind::Render).unwrap();
    assert!(rendered.result.is_success());
    assert_eq!(rendered.attempts, 3);
    assert_eq!(record.status(), ScrapeStatus::Completed);
    assert!(record.stage(StageKind::Vision).is_none());
    assert!(record.stage(StageKind::Nlp).is_none());
}

#[tokio::test]
async fn test_permanent_render_failure_is_not_retried() {
    let render = Arc::new(MockRenderEngine::always(RenderStep::PermanentError));
    let orchestrator = PipelineOrchestrator::new(Providers::new(render.clone()));
    let policy = test_policy().build().unwrap();

    let record = orchestrator
        .run(&ScrapeRequest::new("https://example.com"), &policy)
        .await;

    let rendered = record.stage(StageKind::Render).unwrap();
    assert_eq!(rendered.attempts, 1);
    assert_eq!(render.calls(), 1);
    assert_eq!(rendered.result.error_kind(), Some(ErrorKind::RenderError));
    assert_eq!(record.status(), ScrapeStatus::Failed);
}

#[tokio::test]
async fn test_vision_failure_does_not_stop_nlp() {
    let render = Arc::new(MockRenderEngine::always(RenderStep::PageWithScreenshot(
        ARTICLE_HTML.to_string(),
        png_bytes(8, 4),
    )));
    let ocr = Arc::new(MockOcrEngine::failing(ProviderStep::PermanentError));
    let nlp = Arc::new(RecordingNlpEngine::new());
    let orchestrator = PipelineOrchestrator::new(
        Providers::new(render)
            .with_ocr(ocr.clone())
            .with_nlp(nlp.clone()),
    );
    let policy = test_policy().build().unwrap();

    let record = orchestrator
        .run(&ScrapeRequest::new("https://example.com/report"), &policy)
        .await;

    let vision = record.stage(StageKind::Vision).unwrap();
    assert_eq!(vision.result.error_kind(), Some(ErrorKind::VisionError));
    assert_eq!(vision.attempts, 1);
    assert_eq!(ocr.calls(), 1);

    assert!(record.result(StageKind::Nlp).unwrap().is_success());
    assert_eq!(nlp.inputs().len(), 1);
    assert_eq!(record.status(), ScrapeStatus::PartiallyCompleted);
}

#[tokio::test(start_paused = true)]
async fn test_transient_vision_failure_retries_exactly_retry_attempts() {
    let render = Arc::new(MockRenderEngine::always(RenderStep::PageWithScreenshot(
        ARTICLE_HTML.to_string(),
        png_bytes(8, 4),
    )));
    let ocr = Arc::new(MockOcrEngine::failing(ProviderStep::TransientError));
    let orchestrator = PipelineOrchestrator::new(Providers::new(render).with_ocr(ocr.clone()));
    let policy = test_policy().retry_attempts(2).build().unwrap();

    let record = orchestrator
        .run(&ScrapeRequest::new("https://example.com"), &policy)
        .await;

    let vision = record.stage(StageKind::Vision).unwrap();
    assert_eq!(vision.attempts, 3);
    assert_eq!(ocr.calls(), 3);
    assert!(vision.result.is_failed());
    assert_eq!(record.status(), ScrapeStatus::PartiallyCompleted);
}

#[tokio::test]
async fn test_ocr_text_is_analyzed_separately() {
    let render = Arc::new(MockRenderEngine::always(RenderStep::PageWithScreenshot(
        ARTICLE_HTML.to_string(),
        png_bytes(16, 9),
    )));
    let nlp = Arc::new(RecordingNlpEngine::new());
    let orchestrator = PipelineOrchestrator::new(
        Providers::new(render)
            .with_ocr(Arc::new(MockOcrEngine::returning("Invoice total $42.00")))
            .with_detection(Arc::new(MockDetectionEngine))
            .with_nlp(nlp.clone()),
    );
    let policy = test_policy().build().unwrap();

    let run = orchestrator
        .execute(
            &ScrapeRequest::new("https://example.com/invoice"),
            &policy,
            &scrapevision::pipeline::cancel::CancelToken::never(),
        )
        .await;
    let record = run.record;

    assert_eq!(record.status(), ScrapeStatus::Completed);
    assert!(run.screenshot.is_some());

    match record.result(StageKind::Vision).unwrap().payload() {
        Some(StagePayload::Vision(vision)) => {
            assert_eq!((vision.width, vision.height), (16, 9));
            assert_eq!(vision.text.as_deref(), Some("Invoice total $42.00"));
            assert_eq!(vision.detections.len(), 1);
            assert_eq!(vision.detections[0].label, "logo");
        }
        other => panic!("unexpected vision payload: {:?}", other),
    }

    match record.result(StageKind::Nlp).unwrap().payload() {
        Some(StagePayload::Nlp(payload)) => {
            let ocr = payload.ocr.as_ref().unwrap();
            assert_eq!(labels(&ocr.entities), vec!["MONEY"]);
            assert!(payload.page.is_some());
        }
        other => panic!("unexpected nlp payload: {:?}", other),
    }
    assert_eq!(nlp.inputs().len(), 2);
}

#[tokio::test]
async fn test_undecodable_screenshot_fails_vision() {
    let render = Arc::new(MockRenderEngine::always(RenderStep::PageWithScreenshot(
        ARTICLE_HTML.to_string(),
        b"not an image".to_vec(),
    )));
    let ocr = Arc::new(MockOcrEngine::returning("text"));
    let orchestrator = PipelineOrchestrator::new(Providers::new(render).with_ocr(ocr.clone()));
    let policy = test_policy().build().unwrap();

    let record = orchestrator
        .run(
            &ScrapeRequest::new("https://example.com").with_stages([StageKind::Vision]),
            &policy,
        )
        .await;

    let vision = record.stage(StageKind::Vision).unwrap();
    assert_eq!(vision.result.error_kind(), Some(ErrorKind::VisionError));
    assert_eq!(vision.attempts, 1);
    assert_eq!(ocr.calls(), 0);
    assert!(record.stage(StageKind::Nlp).is_none());
    assert_eq!(record.status(), ScrapeStatus::PartiallyCompleted);
}

#[tokio::test]
async fn test_failed_mandatory_nlp_marks_partial() {
    let render = Arc::new(MockRenderEngine::always(RenderStep::Page(
        ARTICLE_HTML.to_string(),
    )));
    let orchestrator = PipelineOrchestrator::new(
        Providers::new(render)
            .with_nlp(Arc::new(RecordingNlpEngine::with_step(ProviderStep::PermanentError))),
    );
    let policy = test_policy()
        .mandatory_stages([StageKind::Render, StageKind::Nlp])
        .build()
        .unwrap();

    let record = orchestrator
        .run(&ScrapeRequest::new("https://example.com"), &policy)
        .await;

    assert_eq!(
        record.result(StageKind::Nlp).unwrap().error_kind(),
        Some(ErrorKind::NlpError)
    );
    assert_eq!(record.status(), ScrapeStatus::PartiallyCompleted);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_render_skips_downstream() {
    let render = Arc::new(MockRenderEngine::always(RenderStep::Hang));
    let orchestrator = PipelineOrchestrator::new(
        Providers::new(render.clone()).with_nlp(Arc::new(RecordingNlpEngine::new())),
    );
    let policy = test_policy().build().unwrap();
    let handle = CancelHandle::new();

    let canceller = handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        canceller.cancel();
    });

    let record = orchestrator
        .run_cancellable(
            &ScrapeRequest::new("https://example.com"),
            &policy,
            &handle.token(),
        )
        .await;

    let rendered = record.stage(StageKind::Render).unwrap();
    assert_eq!(rendered.result.error_kind(), Some(ErrorKind::Cancelled));
    assert_eq!(rendered.attempts, 1);
    assert_eq!(render.calls(), 1);
    for stage in [StageKind::Vision, StageKind::Nlp] {
        assert_eq!(record.result(stage).unwrap().skip_reason(), Some(SKIP_CANCELLED));
    }
    assert_eq!(record.status(), ScrapeStatus::Failed);
}

#[tokio::test]
async fn test_record_serializes_every_scheduled_stage() {
    let render = Arc::new(MockRenderEngine::always(RenderStep::Page(
        ARTICLE_HTML.to_string(),
    )));
    let orchestrator = PipelineOrchestrator::new(Providers::new(render));
    let policy = test_policy().build().unwrap();

    let record = orchestrator
        .run(&ScrapeRequest::new("https://Example.com/a"), &policy)
        .await;
    let value = serde_json::to_value(&record).unwrap();

    assert_eq!(value["domain"], "example.com");
    assert_eq!(value["status"], "completed");
    assert_eq!(value["stages"]["render"]["status"], "success");
    assert_eq!(value["stages"]["vision"]["status"], "skipped");
    assert_eq!(value["stages"]["nlp"]["status"], "skipped");
    assert!(matches!(
        record.result(StageKind::Nlp),
        Some(StageResult::Skipped { .. })
    ));
}
