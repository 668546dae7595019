/*!
Batch variants: each item runs the underlying operation in sequence and
produces its own typed result; a failure never aborts the rest. The outer
envelope is always `ok` with a summary whose counts sum to the total.
*/

use fsbroker_core::{
    BatchOk, BatchReadRequest, BatchUpdateRequest, BatchWriteRequest, ReadOk, Response, UpdateOk,
    UpdateRequest, WriteOk, WriteRequest,
};

use crate::actor::ServiceCtx;

pub(crate) async fn batch_read(ctx: &ServiceCtx, req: BatchReadRequest) -> Response<BatchOk<ReadOk>> {
    let mut results = Vec::with_capacity(req.files.len());
    for item in req.files {
        results.push(crate::read::run(ctx, item).await);
    }
    Response::Ok(BatchOk::from_results(results))
}

pub(crate) async fn batch_write(
    ctx: &ServiceCtx,
    req: BatchWriteRequest,
) -> Response<BatchOk<WriteOk>> {
    let mut results = Vec::with_capacity(req.files.len());
    for item in req.files {
        let write_req = WriteRequest {
            path: item.path,
            content: item.content,
            encoding: item.encoding,
            create_dirs: item.create_dirs,
            timeout: req.timeout,
        };
        results.push(crate::write::run(ctx, write_req).await);
    }
    Response::Ok(BatchOk::from_results(results))
}

pub(crate) async fn batch_update(
    ctx: &ServiceCtx,
    req: BatchUpdateRequest,
) -> Response<BatchOk<UpdateOk>> {
    let mut results = Vec::with_capacity(req.files.len());
    for item in req.files {
        let update_req = UpdateRequest {
            path: item.path,
            expected_hash: item.expected_hash,
            content: item.content,
            patches: item.patches,
            encoding: item.encoding,
            timeout: req.timeout,
            diff_format: req.diff_format,
        };
        results.push(crate::update::run(ctx, update_req).await);
    }
    Response::Ok(BatchOk::from_results(results))
}
