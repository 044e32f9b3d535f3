pub mod storage_service;
