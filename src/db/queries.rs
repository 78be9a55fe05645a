use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::job::{BatchJob, JobState, ResultRecord};

fn job_from_row(row: &PgRow) -> Result<BatchJob, sqlx::Error> {
    let state_str: String = row.try_get("state")?;
    let state = JobState::from_str(&state_str).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    Ok(BatchJob {
        id: row.try_get("id")?,
        state,
        total_images: row.try_get("total_images")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a new batch job in the pending state
pub async fn create_job(
    pool: &PgPool,
    job_id: Uuid,
    total_images: i32,
) -> Result<BatchJob, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO batch_jobs (id, state, total_images)
        VALUES ($1, 'pending', $2)
        RETURNING id, state, total_images, created_at, updated_at
        "#,
    )
    .bind(job_id)
    .bind(total_images)
    .fetch_one(pool)
    .await?;

    job_from_row(&row)
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<BatchJob>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, state, total_images, created_at, updated_at
        FROM batch_jobs
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Move a job from `from` to `to`. Returns false when the job was not in `from`.
pub async fn transition_job_state(
    pool: &PgPool,
    job_id: Uuid,
    from: JobState,
    to: JobState,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE batch_jobs
        SET state = $1,
            updated_at = NOW(),
            processing_started_at = CASE WHEN $1 = 'running' THEN NOW() ELSE processing_started_at END,
            processing_completed_at = CASE WHEN $1 = 'complete' THEN NOW() ELSE processing_completed_at END
        WHERE id = $2 AND state = $3
        "#,
    )
    .bind(to.as_ref())
    .bind(job_id)
    .bind(from.as_ref())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Append one result record
pub async fn insert_result(pool: &PgPool, record: &ResultRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO image_results
            (job_id, row_index, image_index, serial_number, product_name,
             input_image_url, output_image_url, error)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(record.job_id)
    .bind(record.row_index)
    .bind(record.image_index)
    .bind(record.serial_number)
    .bind(&record.product_name)
    .bind(&record.input_image_url)
    .bind(&record.output_image_url)
    .bind(&record.error)
    .execute(pool)
    .await?;

    Ok(())
}

/// All result records of a job, in batch order
pub async fn list_results(pool: &PgPool, job_id: Uuid) -> Result<Vec<ResultRecord>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT job_id, row_index, image_index, serial_number, product_name,
               input_image_url, output_image_url, error
        FROM image_results
        WHERE job_id = $1
        ORDER BY row_index ASC, image_index ASC
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| {
            Ok(ResultRecord {
                job_id: r.try_get("job_id")?,
                row_index: r.try_get("row_index")?,
                image_index: r.try_get("image_index")?,
                serial_number: r.try_get("serial_number")?,
                product_name: r.try_get("product_name")?,
                input_image_url: r.try_get("input_image_url")?,
                output_image_url: r.try_get("output_image_url")?,
                error: r.try_get("error")?,
            })
        })
        .collect()
}
