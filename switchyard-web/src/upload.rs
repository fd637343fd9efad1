//! 表单与文件上传
//!
//! 基于 multer 解析 multipart/form-data，其余表单按 urlencoded 解析。
//! 执行链运行在阻塞线程上，请求体已经完整读入内存，
//! 所以这里用 `futures::executor::block_on` 驱动 multer 的异步接口。

use crate::properties::MultipartProperties;
use bytes::Bytes;
use futures::executor::block_on;
use http::header::CONTENT_TYPE;
use http::HeaderMap;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use switchyard_validator::Required;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormError {
    #[error("Failed to parse multipart boundary: {0}")]
    Boundary(#[source] multer::Error),

    #[error("Failed to read multipart field: {0}")]
    Multipart(#[source] multer::Error),

    #[error("Too many multipart fields, at most {0} are accepted")]
    TooManyFields(usize),

    #[error("Failed to decode form body: {0}")]
    Urlencoded(#[from] serde_urlencoded::de::Error),
}

/// 上传的文件
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadedFile {
    /// 字段名称
    pub field_name: String,

    /// 原始文件名（如果提供）
    pub file_name: Option<String>,

    /// 文件内容类型（如果提供）
    pub content_type: Option<String>,

    /// 文件数据
    pub data: Bytes,
}

impl UploadedFile {
    pub async fn from_field(field: multer::Field<'_>) -> Result<Self, multer::Error> {
        let field_name = field.name().unwrap_or("unknown").to_string();
        let file_name = field.file_name().map(|s| s.to_string());
        let content_type = field.content_type().map(|mime| mime.to_string());
        let data = field.bytes().await?;

        Ok(Self {
            field_name,
            file_name,
            content_type,
            data,
        })
    }

    /// 文件大小（字节）
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 文件扩展名
    pub fn extension(&self) -> Option<&str> {
        self.file_name
            .as_deref()
            .and_then(|name| name.rfind('.').map(|pos| &name[pos + 1..]))
    }

    /// 以 `Read + Seek` 的方式读取内容
    pub fn reader(&self) -> Cursor<Bytes> {
        Cursor::new(self.data.clone())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// 写入磁盘。处理器运行在阻塞线程上，直接使用同步 IO
    pub fn save_to(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        std::fs::write(path, &self.data)
    }
}

impl Required for UploadedFile {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

/// 解析后的表单：普通字段按出现顺序保存，文件按字段名分组
#[derive(Debug, Clone, Default)]
pub struct FormData {
    pub fields: Vec<(String, String)>,
    pub files: HashMap<String, Vec<UploadedFile>>,
}

impl FormData {
    /// 按 Content-Type 选择解析方式
    pub fn parse(
        headers: &HeaderMap,
        body: &Bytes,
        properties: &MultipartProperties,
    ) -> Result<Self, FormError> {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        if content_type.starts_with("multipart/form-data") {
            Self::parse_multipart(content_type, body.clone(), properties)
        } else if body.is_empty() {
            Ok(Self::default())
        } else {
            Ok(Self {
                fields: serde_urlencoded::from_bytes(body)?,
                files: HashMap::new(),
            })
        }
    }

    fn parse_multipart(
        content_type: &str,
        body: Bytes,
        properties: &MultipartProperties,
    ) -> Result<Self, FormError> {
        let boundary = multer::parse_boundary(content_type).map_err(FormError::Boundary)?;
        let stream = futures::stream::once(async move { Ok::<Bytes, std::io::Error>(body) });
        let mut multipart =
            multer::Multipart::with_constraints(stream, boundary, properties.to_multer_constraints());

        block_on(async {
            let mut form = Self::default();
            let mut count = 0usize;

            while let Some(field) = multipart.next_field().await.map_err(FormError::Multipart)? {
                count += 1;
                if count > properties.max_fields {
                    return Err(FormError::TooManyFields(properties.max_fields));
                }

                let name = field.name().unwrap_or("unknown").to_string();
                if field.file_name().is_some() {
                    let file = UploadedFile::from_field(field)
                        .await
                        .map_err(FormError::Multipart)?;
                    form.files.entry(name).or_default().push(file);
                } else {
                    let value = field.text().await.map_err(FormError::Multipart)?;
                    form.fields.push((name, value));
                }
            }

            Ok(form)
        })
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn file(&self, name: &str) -> Option<&UploadedFile> {
        self.files.get(name).and_then(|files| files.first())
    }
}
